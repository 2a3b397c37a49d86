//! Device authorization records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::credential::IssuedKey;

/// Lifecycle state of a device authorization.
///
/// ```text
/// pending --approve--> approved --poll--> consumed
///    |                    |
///    +------timeout-------+-------------> expired
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Approved,
    Consumed,
    Expired,
}

impl AuthorizationStatus {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed | Self::Expired)
    }

    /// States that hold a claim on their `user_code`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

/// Status as observed at `now`, without touching storage.
///
/// Pending and approved records at or past `expires_at` read as expired.
/// Consumed stays consumed forever.
pub fn effective_status(
    status: AuthorizationStatus,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> AuthorizationStatus {
    if status.is_active() && now >= expires_at {
        AuthorizationStatus::Expired
    } else {
        status
    }
}

/// One login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub client_name: Option<String>,
    pub status: AuthorizationStatus,
    pub issued_key: Option<IssuedKey>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub interval_secs: u64,
    pub approved_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl DeviceAuthorization {
    pub fn effective_status(&self, now: DateTime<Utc>) -> AuthorizationStatus {
        effective_status(self.status, now, self.expires_at)
    }

    /// Apply a transition in place, enforcing the state machine.
    ///
    /// The caller is responsible for having compared `status` first; this
    /// only rejects moves the state machine never allows.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        use AuthorizationStatus::*;
        match (self.status, transition) {
            (Pending, Transition::Approve { key, at }) => {
                self.status = Approved;
                self.issued_key = Some(key);
                self.approved_at = Some(at);
            }
            (Approved, Transition::Consume { at }) => {
                self.status = Consumed;
                self.consumed_at = Some(at);
            }
            (Pending | Approved, Transition::Expire) => {
                self.status = Expired;
                self.issued_key = None;
            }
            (from, transition) => {
                return Err(TransitionError {
                    from,
                    to: transition.target(),
                })
            }
        }
        Ok(())
    }

    /// Point in time after which the reaper may drop a terminal record.
    pub fn terminal_since(&self) -> Option<DateTime<Utc>> {
        match self.status {
            AuthorizationStatus::Consumed => Some(self.consumed_at.unwrap_or(self.expires_at)),
            AuthorizationStatus::Expired => Some(self.expires_at),
            _ => None,
        }
    }
}

/// A guarded state change applied by [`AuthorizationStore::compare_and_swap`].
///
/// [`AuthorizationStore::compare_and_swap`]: super::store::AuthorizationStore::compare_and_swap
#[derive(Debug, Clone)]
pub enum Transition {
    Approve { key: IssuedKey, at: DateTime<Utc> },
    Consume { at: DateTime<Utc> },
    Expire,
}

impl Transition {
    pub fn target(&self) -> AuthorizationStatus {
        match self {
            Self::Approve { .. } => AuthorizationStatus::Approved,
            Self::Consume { .. } => AuthorizationStatus::Consumed,
            Self::Expire => AuthorizationStatus::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: AuthorizationStatus,
    pub to: AuthorizationStatus,
}
