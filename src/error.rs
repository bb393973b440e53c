//! Error types for the multisig relayer

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for approval orchestration
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Transient network error on {backend}: {message}")]
    TransientNetwork { backend: String, message: String },

    #[error("{operation} failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<ApprovalError>,
    },

    #[error("Validation rejected item {item}")]
    ValidationRejected { item: String },

    #[error("Insufficient approvals: {current}/{required}")]
    InsufficientApprovals { current: usize, required: usize },

    #[error("Item {item} already executed")]
    AlreadyExecuted { item: String },

    #[error("{signer} is not an authorized signer for {item}")]
    NotAnAuthorizedSigner { signer: String, item: String },

    #[error("Order {seqno} was not confirmed on-chain")]
    ProposalNotConfirmed { seqno: u64 },

    #[error("Coordinator returned {status}: {message}")]
    Coordinator { status: u16, message: String },

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApprovalError {
    /// Check if error is worth retrying against the same backend
    pub fn is_retryable(&self) -> bool {
        match self {
            ApprovalError::TransientNetwork { .. } | ApprovalError::Chain(_) => true,
            ApprovalError::Coordinator { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if the item should never be processed again by this approver
    pub fn retires_item(&self) -> bool {
        match self {
            ApprovalError::AlreadyExecuted { .. } | ApprovalError::NotAnAuthorizedSigner { .. } => {
                true
            }
            ApprovalError::ExhaustedRetries { source, .. } => source.retires_item(),
            _ => false,
        }
    }

    /// Short label used for metrics and API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ApprovalError::ConfigMissing(_) => "config_missing",
            ApprovalError::TransientNetwork { .. } => "transient_network",
            ApprovalError::ExhaustedRetries { .. } => "exhausted_retries",
            ApprovalError::ValidationRejected { .. } => "validation_rejected",
            ApprovalError::InsufficientApprovals { .. } => "insufficient_approvals",
            ApprovalError::AlreadyExecuted { .. } => "already_executed",
            ApprovalError::NotAnAuthorizedSigner { .. } => "not_an_authorized_signer",
            ApprovalError::ProposalNotConfirmed { .. } => "proposal_not_confirmed",
            ApprovalError::Coordinator { .. } => "coordinator",
            ApprovalError::Chain(_) => "chain",
            ApprovalError::Signing(_) => "signing",
            ApprovalError::InvalidInput(_) => "invalid_input",
            ApprovalError::NotFound(_) => "not_found",
            ApprovalError::Internal(_) => "internal",
        }
    }

    /// HTTP status for API responses: 4xx for caller errors, 5xx for backend errors
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApprovalError::InvalidInput(_)
            | ApprovalError::NotAnAuthorizedSigner { .. }
            | ApprovalError::ValidationRejected { .. } => StatusCode::BAD_REQUEST,
            ApprovalError::NotFound(_) => StatusCode::NOT_FOUND,
            ApprovalError::AlreadyExecuted { .. } => StatusCode::CONFLICT,
            ApprovalError::InsufficientApprovals { .. } => StatusCode::ACCEPTED,
            ApprovalError::Coordinator { status, .. } if *status == 404 => StatusCode::NOT_FOUND,
            ApprovalError::Coordinator { status, .. } if (400..500).contains(status) => {
                StatusCode::BAD_REQUEST
            }
            ApprovalError::TransientNetwork { .. }
            | ApprovalError::ExhaustedRetries { .. }
            | ApprovalError::Coordinator { .. }
            | ApprovalError::Chain(_)
            | ApprovalError::ProposalNotConfirmed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ApprovalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ApprovalError::Internal(format!("Malformed response: {}", e));
        }
        match e.status() {
            Some(status) => ApprovalError::Coordinator {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => ApprovalError::TransientNetwork {
                backend: e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| "http".to_string()),
                message: e.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ApprovalError {
    fn from(e: serde_json::Error) -> Self {
        ApprovalError::Internal(format!("JSON error: {}", e))
    }
}

impl From<ethers::signers::WalletError> for ApprovalError {
    fn from(e: ethers::signers::WalletError) -> Self {
        ApprovalError::Signing(e.to_string())
    }
}

/// Result type for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_errors_retry_only_on_server_side() {
        let server = ApprovalError::Coordinator {
            status: 503,
            message: "unavailable".into(),
        };
        let client = ApprovalError::Coordinator {
            status: 422,
            message: "bad signature".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert_eq!(client.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(server.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn exhausted_retries_keeps_retirement_of_inner_error() {
        let err = ApprovalError::ExhaustedRetries {
            operation: "approve".into(),
            attempts: 3,
            source: Box::new(ApprovalError::AlreadyExecuted { item: "7".into() }),
        };
        assert!(err.retires_item());
        assert!(!err.is_retryable());
    }

    #[test]
    fn unauthorized_signer_is_a_caller_error() {
        let err = ApprovalError::NotAnAuthorizedSigner {
            signer: "EQabc".into(),
            item: "order #3".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "not_an_authorized_signer");
    }
}
