//! Pluggable approval policy
//!
//! A validator decides whether this approver may approve a pending item.
//! Returning `false` skips the item for the current tick only.

use crate::chain::PendingItem;
use crate::config::ValidatorConfig;
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use ethers::types::U256;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, item: &PendingItem) -> ApprovalResult<bool>;
}

/// Review delay staggered by approver index, then approve
///
/// Approvers sharing a wallet wait different amounts of time, so they do not
/// all sign the same item in the same instant.
pub struct CooldownValidator {
    delay: Duration,
}

impl CooldownValidator {
    pub fn new(approver_index: usize, stagger: Duration) -> Self {
        Self {
            delay: stagger * approver_index as u32,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Validator for CooldownValidator {
    async fn validate(&self, item: &PendingItem) -> ApprovalResult<bool> {
        info!("Reviewing {} ({:?} cooldown)", item.id(), self.delay);
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }
}

/// Value ceiling and destination allow-list
pub struct PolicyValidator {
    max_value: Option<U256>,
    allowed_destinations: HashSet<String>,
}

impl PolicyValidator {
    pub fn new(max_value: Option<U256>, allowed_destinations: &[String]) -> Self {
        Self {
            max_value,
            allowed_destinations: allowed_destinations
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> ApprovalResult<Self> {
        let max_value = config
            .max_value
            .as_deref()
            .map(U256::from_dec_str)
            .transpose()
            .map_err(|e| ApprovalError::ConfigMissing(format!("invalid validator.max_value: {}", e)))?;
        Ok(Self::new(max_value, &config.allowed_destinations))
    }

    /// Whether the policy constrains anything at all
    pub fn is_restrictive(&self) -> bool {
        self.max_value.is_some() || !self.allowed_destinations.is_empty()
    }
}

#[async_trait]
impl Validator for PolicyValidator {
    async fn validate(&self, item: &PendingItem) -> ApprovalResult<bool> {
        let transfers = item.transfers();
        if transfers.is_empty() && self.is_restrictive() {
            warn!("{}: no transfers visible to check against policy", item.id());
            return Ok(false);
        }

        for (to, value) in transfers {
            if let Some(max) = self.max_value {
                if value > max {
                    warn!("{}: value {} exceeds limit {}", item.id(), value, max);
                    return Ok(false);
                }
            }
            if !self.allowed_destinations.is_empty()
                && !self.allowed_destinations.contains(&to.to_lowercase())
            {
                warn!("{}: destination {} not allowed", item.id(), to);
                return Ok(false);
            }
        }
        debug!("{} passed policy checks", item.id());
        Ok(true)
    }
}

/// Every member must approve; evaluation stops at the first rejection
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Policy checks first, then the staggered review delay
    pub fn from_config(config: &ValidatorConfig, approver_index: usize) -> ApprovalResult<Self> {
        let mut chain = Self::new();
        let policy = PolicyValidator::from_config(config)?;
        if policy.is_restrictive() {
            chain = chain.with(Arc::new(policy));
        }
        Ok(chain.with(Arc::new(CooldownValidator::new(
            approver_index,
            Duration::from_secs(config.stagger_secs),
        ))))
    }
}

#[async_trait]
impl Validator for ValidatorChain {
    async fn validate(&self, item: &PendingItem) -> ApprovalResult<bool> {
        for validator in &self.validators {
            if !validator.validate(item).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
