//! Error types for Keygate.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::device::{ApproveError, ErrorCode, StartError, StoreError};

/// Primary error type for all Keygate operations outside the core flow.
#[derive(Error, Debug)]
pub enum KeygateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<ErrorCode>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Login failed: {0}")]
    Flow(ErrorCode),

    #[error("Approval failed: {0}")]
    Approve(#[from] ApproveError),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl From<StartError> for KeygateError {
    fn from(error: StartError) -> Self {
        match error {
            StartError::Store(store) => Self::Store(store),
            other => Self::Api {
                status: 503,
                message: other.to_string(),
                code: Some(ErrorCode::TemporarilyUnavailable),
            },
        }
    }
}

impl KeygateError {
    /// Create an API error from a status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Flow(_) => ErrorCategory::Flow,
            Self::Approve(ApproveError::Store(_)) => ErrorCategory::Storage,
            Self::Approve(_) => ErrorCategory::Flow,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, code, .. } => match (status, code) {
                (_, Some(ErrorCode::TemporarilyUnavailable)) => ErrorCategory::Server,
                (_, Some(_)) => ErrorCategory::Flow,
                (500..=599, None) => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Storage
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Flow => RecoverySuggestion::RestartLogin,
            ErrorCategory::Storage => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Network => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, KeygateError>;
