//! Error classification and recovery.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The device flow ended (expired, consumed, unknown code); restart it.
    Flow,
    /// Store unavailable or failing; safe to retry.
    Storage,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    RestartLogin,
    CheckConfiguration,
    IncreaseTimeout,
    ContactSupport,
}
