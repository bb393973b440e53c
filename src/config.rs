//! Configuration management for the multisig relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::ApprovalError;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub service: ServiceConfig,
    pub approver: ApproverConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub safe: Option<SafeConfig>,
    #[serde(default)]
    pub order: Option<OrderConfig>,
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which half of the approval flow this process runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Proposes, reports status and executes fully-signed Safe transactions
    Controller,
    /// Reviews and approves pending items on both backends
    Signer,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub role: Role,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproverConfig {
    /// Index into the key list selecting which owner this instance acts as
    pub index: usize,
    /// Environment variable holding the comma-separated owner private keys
    #[serde(default = "default_keys_env")]
    pub keys_env: String,
    /// This approver's wallet address on the order-based backend
    #[serde(default)]
    pub order_wallet_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    /// Per-index review delay; approver N waits N * stagger before approving
    pub stagger_secs: u64,
    /// Largest transfer value (base units) the policy validator will approve
    #[serde(default)]
    pub max_value: Option<String>,
    /// Destinations the policy validator accepts; empty means any
    #[serde(default)]
    pub allowed_destinations: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            stagger_secs: 20,
            max_value: None,
            allowed_destinations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafeConfig {
    pub enabled: bool,
    pub chain_id: u64,
    pub rpc_url: String,
    pub safe_address: String,
    pub service_url: String,
    #[serde(default = "default_safe_poll_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    pub enabled: bool,
    pub gateway_url: String,
    pub api_key: String,
    pub multisig_address: String,
    #[serde(default = "default_order_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_order_ttl_secs")]
    pub order_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

fn default_keys_env() -> String {
    "KEYS".to_string()
}

fn default_safe_poll_secs() -> u64 {
    10
}

fn default_order_poll_secs() -> u64 {
    5
}

fn default_order_ttl_secs() -> u64 {
    3600
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("MULTISIG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::from_toml(&config_str)?;
        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Parse settings from TOML text after substituting environment variables
    pub fn from_toml(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);
        toml::from_str(&config_str).with_context(|| "Failed to parse configuration")
    }

    /// Port and approver index may be overridden per process
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = env::var("MULTISIG_PORT") {
            self.api.port = port
                .parse()
                .with_context(|| format!("Invalid MULTISIG_PORT: {}", port))?;
        }
        if let Ok(index) = env::var("MULTISIG_KEY_INDEX") {
            self.approver.index = index
                .parse()
                .with_context(|| format!("Invalid MULTISIG_KEY_INDEX: {}", index))?;
        }
        Ok(())
    }

    /// Validate configuration, failing fast on missing identity or backend settings
    pub fn validate(&self) -> Result<(), ApprovalError> {
        if self.safe_backend().is_none() && self.order_backend().is_none() {
            return Err(ApprovalError::ConfigMissing(
                "at least one of [safe] or [order] must be enabled".to_string(),
            ));
        }

        if let Some(safe) = self.safe_backend() {
            require("safe.rpc_url", &safe.rpc_url)?;
            require("safe.safe_address", &safe.safe_address)?;
            require("safe.service_url", &safe.service_url)?;
            require_interval("safe.poll_interval_secs", safe.poll_interval_secs)?;
        }

        if let Some(order) = self.order_backend() {
            require("order.gateway_url", &order.gateway_url)?;
            require("order.api_key", &order.api_key)?;
            require("order.multisig_address", &order.multisig_address)?;
            require_interval("order.poll_interval_secs", order.poll_interval_secs)?;
            if self.service.role == Role::Signer {
                let wallet = self.approver.order_wallet_address.as_deref().unwrap_or("");
                require("approver.order_wallet_address", wallet)?;
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ApprovalError::ConfigMissing(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Safe backend settings, if enabled
    pub fn safe_backend(&self) -> Option<&SafeConfig> {
        self.safe.as_ref().filter(|s| s.enabled)
    }

    /// Order backend settings, if enabled
    pub fn order_backend(&self) -> Option<&OrderConfig> {
        self.order.as_ref().filter(|o| o.enabled)
    }
}

fn require(name: &str, value: &str) -> Result<(), ApprovalError> {
    if value.trim().is_empty() {
        return Err(ApprovalError::ConfigMissing(format!("{} is not set", name)));
    }
    Ok(())
}

fn require_interval(name: &str, secs: u64) -> Result<(), ApprovalError> {
    if secs == 0 {
        return Err(ApprovalError::ConfigMissing(format!("{} must be at least 1", name)));
    }
    Ok(())
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [service]
        role = "signer"

        [approver]
        index = 1
        order_wallet_address = "EQsigner1"

        [safe]
        enabled = true
        chain_id = 11155111
        rpc_url = "https://rpc.sepolia.org"
        safe_address = "0xafd20A968DB9E8f60Cb0DDb74fbD0a1fd797D01c"
        service_url = "https://safe-transaction-sepolia.safe.global"

        [order]
        enabled = true
        gateway_url = "http://localhost:1000"
        api_key = "${MULTISIG_TEST_API_KEY}"
        multisig_address = "EQmultisig"

        [api]
        host = "127.0.0.1"
        port = 2222
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("MULTISIG_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${MULTISIG_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn parses_sample_with_defaults() {
        env::set_var("MULTISIG_TEST_API_KEY", "secret");
        let settings = Settings::from_toml(SAMPLE).expect("parse");
        assert_eq!(settings.service.role, Role::Signer);
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.retry.delay(), Duration::from_secs(5));
        assert_eq!(settings.order_backend().map(|o| o.api_key.as_str()), Some("secret"));
        assert_eq!(settings.safe_backend().map(|s| s.poll_interval_secs), Some(10));
        settings.validate().expect("valid");
    }

    #[test]
    fn missing_order_wallet_fails_for_signer() {
        env::set_var("MULTISIG_TEST_API_KEY", "secret");
        let input = SAMPLE.replace("order_wallet_address = \"EQsigner1\"", "");
        let settings = Settings::from_toml(&input).expect("parse");
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ApprovalError::ConfigMissing(ref m) if m.contains("order_wallet_address")));
    }

    #[test]
    fn no_enabled_backend_is_rejected() {
        let input = r#"
            [service]
            role = "controller"
            [approver]
            index = 0
            [api]
            host = "0.0.0.0"
            port = 1111
        "#;
        let settings = Settings::from_toml(input).expect("parse");
        assert!(matches!(settings.validate(), Err(ApprovalError::ConfigMissing(_))));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        env::set_var("MULTISIG_TEST_API_KEY", "secret");
        let input = SAMPLE.replace(
            "multisig_address = \"EQmultisig\"",
            "multisig_address = \"EQmultisig\"\n        poll_interval_secs = 0",
        );
        let settings = Settings::from_toml(&input).expect("parse");
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ApprovalError::ConfigMissing(ref m) if m.contains("order.poll_interval_secs")));
    }

    #[test]
    fn load_reads_file_from_env_path() {
        env::set_var("MULTISIG_TEST_API_KEY", "secret");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write");
        env::set_var("MULTISIG_CONFIG", file.path());
        let settings = Settings::load().expect("load");
        assert_eq!(settings.api.port, 2222);
        env::remove_var("MULTISIG_CONFIG");
    }
}
