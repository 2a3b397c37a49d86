//! Request and response bodies of the device flow.
//!
//! These shapes are the wire contract shared by the HTTP server and the
//! login client.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::credential::IssuedKey;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// Answer to `start`. `device_code` is the only secret here.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: u64,
    pub interval: u64,
}

impl fmt::Debug for StartResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartResponse")
            .field("device_code", &"***")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("verification_uri_complete", &self.verification_uri_complete)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub device_code: String,
}

impl fmt::Debug for PollRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollRequest")
            .field("device_code", &"***")
            .finish()
    }
}

/// Result of one `poll` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not approved yet; retry after `interval`.
    AuthorizationPending,
    /// Delivered exactly once, to the poll that consumed the record.
    Approved { key: IssuedKey },
    /// The key was already delivered to an earlier poll.
    Consumed,
    /// Restart the flow.
    Expired,
    /// Unknown device code. Restart the flow.
    InvalidCode,
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AuthorizationPending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PollStatus {
    AuthorizationPending,
    Approved,
    Consumed,
    Expired,
}

/// Poll body as sent on the wire.
///
/// ```
/// use keygate::device::{PollOutcome, PollResponse};
///
/// let body = serde_json::to_value(PollResponse::from(PollOutcome::Consumed)).unwrap();
/// assert_eq!(body, serde_json::json!({ "status": "consumed" }));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollResponse {
    Status {
        status: PollStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Error {
        error: ErrorCode,
    },
}

impl fmt::Debug for PollResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, key } => f
                .debug_struct("Status")
                .field("status", status)
                .field("key", &key.as_ref().map(|_| "***"))
                .finish(),
            Self::Error { error } => f.debug_struct("Error").field("error", error).finish(),
        }
    }
}

impl From<PollOutcome> for PollResponse {
    fn from(outcome: PollOutcome) -> Self {
        let status = |status| Self::Status { status, key: None };
        match outcome {
            PollOutcome::AuthorizationPending => status(PollStatus::AuthorizationPending),
            PollOutcome::Approved { key } => Self::Status {
                status: PollStatus::Approved,
                key: Some(key.into_inner()),
            },
            PollOutcome::Consumed => status(PollStatus::Consumed),
            PollOutcome::Expired => status(PollStatus::Expired),
            PollOutcome::InvalidCode => Self::Error {
                error: ErrorCode::InvalidCode,
            },
        }
    }
}

impl From<PollResponse> for PollOutcome {
    fn from(response: PollResponse) -> Self {
        match response {
            PollResponse::Status {
                status: PollStatus::Approved,
                key: Some(key),
            } => Self::Approved {
                key: IssuedKey::new(key),
            },
            // An approval without a key cannot be used; treat it as delivered.
            PollResponse::Status {
                status: PollStatus::Approved | PollStatus::Consumed,
                ..
            } => Self::Consumed,
            PollResponse::Status {
                status: PollStatus::AuthorizationPending,
                ..
            } => Self::AuthorizationPending,
            PollResponse::Status {
                status: PollStatus::Expired,
                ..
            } => Self::Expired,
            PollResponse::Error { .. } => Self::InvalidCode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub user_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub user_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// Machine-readable error codes carried in `{ "error": ... }` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    InvalidCode,
    UnknownUserCode,
    AlreadyUsed,
    Expired,
    InvalidRequest,
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
}
