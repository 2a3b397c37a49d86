use keygate::device::{ApproveError, ErrorCode, StartError, StoreError};
use keygate::error::{ErrorCategory, KeygateError, RecoverySuggestion};

#[test]
fn store_failures_are_retryable() {
    let err = KeygateError::from(StoreError::Unavailable("down".to_string()));
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(err.is_retryable());
    assert_eq!(err.recovery_suggestion(), RecoverySuggestion::RetryWithBackoff);
}

#[test]
fn ended_flows_suggest_restarting_login() {
    for err in [
        KeygateError::Flow(ErrorCode::Expired),
        KeygateError::Approve(ApproveError::AlreadyUsed),
        KeygateError::Api {
            status: 410,
            message: "expired".to_string(),
            code: Some(ErrorCode::Expired),
        },
    ] {
        assert_eq!(err.category(), ErrorCategory::Flow, "{err}");
        assert!(!err.is_retryable());
        assert_eq!(err.recovery_suggestion(), RecoverySuggestion::RestartLogin);
    }
}

#[test]
fn server_unavailability_is_retryable() {
    let err = KeygateError::Api {
        status: 503,
        message: "temporarily_unavailable".to_string(),
        code: Some(ErrorCode::TemporarilyUnavailable),
    };
    assert_eq!(err.category(), ErrorCategory::Server);
    assert!(err.is_retryable());

    assert_eq!(KeygateError::api(502, "bad gateway").category(), ErrorCategory::Server);
    assert_eq!(KeygateError::api(418, "teapot").category(), ErrorCategory::Api);
}

#[test]
fn exhausted_code_space_surfaces_as_unavailable() {
    let err = KeygateError::from(StartError::CodeSpaceExhausted { attempts: 8 });
    assert!(err.is_retryable());
    assert!(err.to_string().contains("503"));
}

#[test]
fn configuration_errors_point_at_configuration() {
    let err = KeygateError::Configuration("KEYGATE_BIND has an invalid value".to_string());
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(
        err.recovery_suggestion(),
        RecoverySuggestion::CheckConfiguration
    );
}

#[test]
fn approve_store_failure_is_storage() {
    let err = KeygateError::from(ApproveError::Store(StoreError::Io("disk full".to_string())));
    assert_eq!(err.category(), ErrorCategory::Storage);
}
