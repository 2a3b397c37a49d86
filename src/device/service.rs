use std::sync::Arc;

use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::codes::{
    display_user_code, fingerprint, generate_device_code, generate_user_code, normalize_user_code,
};
use super::credential::IssuedKey;
use super::error::{ApproveError, StartError};
use super::messages::{ApproveResponse, PollOutcome, StartResponse};
use super::record::{AuthorizationStatus, DeviceAuthorization, Transition};
use super::store::{AuthorizationStore, CasOutcome, StoreError};

pub const DEFAULT_TTL_SECS: i64 = 600;
pub const DEFAULT_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_VERIFICATION_URI: &str = "http://127.0.0.1:8787/device";
pub const DEFAULT_CLIENT_NAME_MAX_LEN: usize = 64;

/// Fresh codes are drawn this many times before `start` gives up.
const MAX_CODE_ATTEMPTS: u32 = 8;
/// Each CAS loss means the record moved forward; three moves reach a
/// terminal state, so this bound is never hit by a healthy store.
const MAX_CAS_ROUNDS: usize = 4;

/// Parameters of newly issued authorizations.
///
/// # Example
/// ```
/// use keygate::device::FlowSettings;
///
/// let settings = FlowSettings::builder()
///     .interval_secs(5)
///     .verification_uri("https://example.com/device")
///     .build();
/// assert_eq!(settings.ttl.num_seconds(), 600);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct FlowSettings {
    #[builder(default = Duration::seconds(DEFAULT_TTL_SECS))]
    pub ttl: Duration,
    #[builder(default = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,
    #[builder(into, default = DEFAULT_VERIFICATION_URI.to_string())]
    pub verification_uri: String,
    /// Longer names are truncated to this many characters.
    #[builder(default = DEFAULT_CLIENT_NAME_MAX_LEN)]
    pub client_name_max_len: usize,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FlowSettings {
    /// Trim, drop empty names, truncate on a char boundary.
    pub fn sanitize_client_name(&self, name: Option<&str>) -> Option<String> {
        let trimmed = name?.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(self.client_name_max_len).collect())
    }

    pub fn verification_uri_complete(&self, user_code: &str) -> String {
        let separator = if self.verification_uri.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{separator}user_code={user_code}", self.verification_uri)
    }
}

/// What the approval surface may show about a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalView {
    pub user_code: String,
    pub client_name: Option<String>,
    pub status: AuthorizationStatus,
    pub expires_at: DateTime<Utc>,
}

/// Device authorization flow: issue codes, take approvals, deliver keys.
///
/// Stateless apart from the store; share it behind an `Arc` across request
/// handlers.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use keygate::device::{DeviceAuthService, MemoryAuthorizationStore, PollOutcome};
///
/// let service = DeviceAuthService::new(Arc::new(MemoryAuthorizationStore::new()));
/// let started = service.start(Some("my-cli"))?;
/// assert_eq!(service.poll(&started.device_code)?, PollOutcome::AuthorizationPending);
///
/// service.approve(&started.user_code)?;
/// assert!(matches!(service.poll(&started.device_code)?, PollOutcome::Approved { .. }));
/// assert_eq!(service.poll(&started.device_code)?, PollOutcome::Consumed);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct DeviceAuthService {
    store: Arc<dyn AuthorizationStore>,
    clock: Arc<dyn Clock>,
    settings: FlowSettings,
}

impl DeviceAuthService {
    pub fn new(store: Arc<dyn AuthorizationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            settings: FlowSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn AuthorizationStore> {
        &self.store
    }

    /// Create a pending authorization and return its codes.
    pub fn start(&self, client_name: Option<&str>) -> Result<StartResponse, StartError> {
        let client_name = self.settings.sanitize_client_name(client_name);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let now = self.clock.now();
            let record = DeviceAuthorization {
                device_code: generate_device_code(),
                user_code: generate_user_code(),
                client_name: client_name.clone(),
                status: AuthorizationStatus::Pending,
                issued_key: None,
                created_at: now,
                expires_at: now + self.settings.ttl,
                interval_secs: self.settings.interval_secs,
                approved_at: None,
                consumed_at: None,
            };
            match self.store.insert(&record) {
                Ok(()) => {
                    info!(
                        record = %fingerprint(&record.device_code),
                        user_code = %record.user_code,
                        client_name = record.client_name.as_deref().unwrap_or("-"),
                        "device authorization started"
                    );
                    return Ok(self.summary(&record));
                }
                Err(StoreError::Conflict(key)) => {
                    warn!(attempt, key = %key, "code collision, regenerating");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(StartError::CodeSpaceExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    fn summary(&self, record: &DeviceAuthorization) -> StartResponse {
        let user_code = display_user_code(&record.user_code);
        StartResponse {
            device_code: record.device_code.clone(),
            verification_uri: self.settings.verification_uri.clone(),
            verification_uri_complete: self.settings.verification_uri_complete(&user_code),
            user_code,
            expires_in: (record.expires_at - record.created_at).num_seconds().max(0) as u64,
            interval: record.interval_secs,
        }
    }

    /// Read-only view for the approval page. Never exposes secrets.
    pub fn lookup(&self, user_code: &str) -> Result<Option<ApprovalView>, StoreError> {
        let Some(user_code) = normalize_user_code(user_code) else {
            return Ok(None);
        };
        let now = self.clock.now();
        Ok(self
            .store
            .find_active_by_user_code(&user_code)?
            .map(|record| ApprovalView {
                user_code: display_user_code(&record.user_code),
                status: record.effective_status(now),
                client_name: record.client_name,
                expires_at: record.expires_at,
            }))
    }

    /// Approve a pending request on behalf of an already-authenticated human.
    ///
    /// Mints the key and moves `pending -> approved` in one CAS. A lost race
    /// (a second tab confirming the same code) yields
    /// [`ApproveError::AlreadyUsed`] and the key minted for it is dropped
    /// unseen.
    pub fn approve(&self, user_code: &str) -> Result<ApproveResponse, ApproveError> {
        let user_code = normalize_user_code(user_code).ok_or(ApproveError::UnknownUserCode)?;
        let record = self
            .store
            .find_active_by_user_code(&user_code)?
            .ok_or(ApproveError::UnknownUserCode)?;

        let now = self.clock.now();
        match record.effective_status(now) {
            AuthorizationStatus::Pending => {}
            AuthorizationStatus::Expired => {
                self.expire_lazily(&record);
                return Err(ApproveError::Expired);
            }
            AuthorizationStatus::Approved | AuthorizationStatus::Consumed => {
                return Err(ApproveError::AlreadyUsed);
            }
        }

        let transition = Transition::Approve {
            key: IssuedKey::mint(),
            at: now,
        };
        match self.store.compare_and_swap(
            &record.device_code,
            AuthorizationStatus::Pending,
            transition,
        )? {
            CasOutcome::Swapped(approved) => {
                info!(
                    record = %fingerprint(&approved.device_code),
                    user_code = %approved.user_code,
                    "device authorization approved"
                );
                Ok(ApproveResponse {
                    user_code: display_user_code(&approved.user_code),
                    client_name: approved.client_name,
                })
            }
            CasOutcome::Mismatch(current) => {
                debug!(user_code = %user_code, "approve lost CAS");
                match current.map(|rec| rec.effective_status(now)) {
                    Some(AuthorizationStatus::Expired) => Err(ApproveError::Expired),
                    _ => Err(ApproveError::AlreadyUsed),
                }
            }
        }
    }

    /// Answer one poll from the CLI client.
    ///
    /// Expiry is computed from the clock on every call. The key is returned
    /// only to the caller whose CAS moves the record `approved -> consumed`.
    pub fn poll(&self, device_code: &str) -> Result<PollOutcome, StoreError> {
        if device_code.is_empty() {
            return Ok(PollOutcome::InvalidCode);
        }
        let mut current = self.store.get(device_code)?;

        for _ in 0..MAX_CAS_ROUNDS {
            let Some(record) = current else {
                return Ok(PollOutcome::InvalidCode);
            };
            let now = self.clock.now();
            let (expected, transition) = match record.effective_status(now) {
                AuthorizationStatus::Pending => return Ok(PollOutcome::AuthorizationPending),
                AuthorizationStatus::Consumed => return Ok(PollOutcome::Consumed),
                AuthorizationStatus::Expired if record.status == AuthorizationStatus::Expired => {
                    return Ok(PollOutcome::Expired)
                }
                AuthorizationStatus::Expired => (record.status, Transition::Expire),
                AuthorizationStatus::Approved => {
                    (AuthorizationStatus::Approved, Transition::Consume { at: now })
                }
            };

            match self
                .store
                .compare_and_swap(device_code, expected, transition)?
            {
                CasOutcome::Swapped(updated) => return self.delivered(updated),
                CasOutcome::Mismatch(latest) => current = latest,
            }
        }

        Err(StoreError::Unavailable(
            "record kept changing during poll".to_string(),
        ))
    }

    fn delivered(&self, record: DeviceAuthorization) -> Result<PollOutcome, StoreError> {
        let fp = fingerprint(&record.device_code);
        match record.status {
            AuthorizationStatus::Consumed => {
                let key = record.issued_key.ok_or_else(|| {
                    StoreError::Unavailable("approved record holds no key".to_string())
                })?;
                info!(record = %fp, "key delivered");
                Ok(PollOutcome::Approved { key })
            }
            _ => {
                info!(record = %fp, "device authorization expired");
                Ok(PollOutcome::Expired)
            }
        }
    }

    fn expire_lazily(&self, record: &DeviceAuthorization) {
        if let Err(e) =
            self.store
                .compare_and_swap(&record.device_code, record.status, Transition::Expire)
        {
            warn!(
                record = %fingerprint(&record.device_code),
                error = %e,
                "lazy expiry failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::store::MemoryAuthorizationStore;

    fn service() -> DeviceAuthService {
        DeviceAuthService::new(Arc::new(MemoryAuthorizationStore::new()))
    }

    #[test]
    fn start_returns_contract_defaults() {
        let svc = service();
        let started = svc.start(None).unwrap();
        assert_eq!(started.expires_in, 600);
        assert_eq!(started.interval, 2);
        assert_eq!(started.user_code.len(), 9);
        assert_eq!(started.verification_uri, DEFAULT_VERIFICATION_URI);
        assert_eq!(
            started.verification_uri_complete,
            format!("{DEFAULT_VERIFICATION_URI}?user_code={}", started.user_code)
        );
    }

    #[test]
    fn client_name_is_trimmed_and_truncated() {
        let settings = FlowSettings::builder().client_name_max_len(4).build();
        assert_eq!(
            settings.sanitize_client_name(Some("  laptop  ")).as_deref(),
            Some("lapt")
        );
        assert_eq!(settings.sanitize_client_name(Some("   ")), None);
        assert_eq!(settings.sanitize_client_name(None), None);
        assert_eq!(
            settings.sanitize_client_name(Some("ééééé")).as_deref(),
            Some("éééé")
        );
    }

    #[test]
    fn verification_uri_with_query_uses_ampersand() {
        let settings = FlowSettings::builder()
            .verification_uri("https://example.com/device?lang=en")
            .build();
        assert_eq!(
            settings.verification_uri_complete("BCDF-GHJK"),
            "https://example.com/device?lang=en&user_code=BCDF-GHJK"
        );
    }

    #[test]
    fn approve_accepts_lowercase_input() {
        let svc = service();
        let started = svc.start(Some("cli")).unwrap();
        let approved = svc.approve(&started.user_code.to_lowercase()).unwrap();
        assert_eq!(approved.user_code, started.user_code);
        assert_eq!(approved.client_name.as_deref(), Some("cli"));
    }

    #[test]
    fn approve_twice_reports_already_used() {
        let svc = service();
        let started = svc.start(None).unwrap();
        svc.approve(&started.user_code).unwrap();
        assert!(matches!(
            svc.approve(&started.user_code),
            Err(ApproveError::AlreadyUsed)
        ));
    }

    #[test]
    fn approve_unknown_code_fails() {
        let svc = service();
        assert!(matches!(
            svc.approve("BCDF-GHJK"),
            Err(ApproveError::UnknownUserCode)
        ));
        assert!(matches!(
            svc.approve("not a code"),
            Err(ApproveError::UnknownUserCode)
        ));
    }

    #[test]
    fn lookup_shows_client_name_without_secrets() {
        let svc = service();
        let started = svc.start(Some("build-box")).unwrap();
        let view = svc.lookup(&started.user_code).unwrap().unwrap();
        assert_eq!(view.client_name.as_deref(), Some("build-box"));
        assert_eq!(view.status, AuthorizationStatus::Pending);
        assert!(svc.lookup("zzzz").unwrap().is_none());
    }

    #[test]
    fn empty_device_code_is_invalid() {
        let svc = service();
        assert_eq!(svc.poll("").unwrap(), PollOutcome::InvalidCode);
    }
}
