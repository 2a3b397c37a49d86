use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use thiserror::Error;

use super::record::{AuthorizationStatus, DeviceAuthorization, Transition};

/// Infrastructure failures of an [`AuthorizationStore`].
///
/// These are never domain outcomes: callers should retry with backoff.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Duplicate key: {0}")]
    Conflict(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result of [`AuthorizationStore::compare_and_swap`].
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The transition was applied; carries the record after the change.
    Swapped(DeviceAuthorization),
    /// The stored status differed from the expected one (or the transition
    /// was illegal from it). Carries the current record, `None` if it is gone.
    Mismatch(Option<DeviceAuthorization>),
}

/// Keyed record store for device authorizations.
///
/// Records are keyed by `device_code`. Every mutation after insert goes
/// through [`compare_and_swap`](Self::compare_and_swap), which must be atomic
/// with respect to every other call on the same record.
pub trait AuthorizationStore: Send + Sync {
    /// Insert a new record.
    ///
    /// Fails with [`StoreError::Conflict`] when the `device_code` exists, or
    /// when the `user_code` belongs to another pending or approved record.
    fn insert(&self, record: &DeviceAuthorization) -> Result<(), StoreError>;

    fn get(&self, device_code: &str) -> Result<Option<DeviceAuthorization>, StoreError>;

    /// Pending or approved record holding `user_code`, if any.
    fn find_active_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceAuthorization>, StoreError>;

    /// Apply `transition` iff the stored status equals `expected`.
    fn compare_and_swap(
        &self,
        device_code: &str,
        expected: AuthorizationStatus,
        transition: Transition,
    ) -> Result<CasOutcome, StoreError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&self, device_code: &str) -> Result<bool, StoreError>;

    /// Snapshot of all records, for housekeeping.
    fn list(&self) -> Result<Vec<DeviceAuthorization>, StoreError>;
}

/// In-memory store.
///
/// The map lock is only held for lookups, inserts and deletes; state
/// changes lock the single record they touch, so unrelated flows never
/// contend on a CAS.
#[derive(Default)]
pub struct MemoryAuthorizationStore {
    records: RwLock<HashMap<String, Arc<Mutex<DeviceAuthorization>>>>,
    /// user_code -> device_code. Entries may outlive the claim; readers check
    /// the record's status.
    user_codes: Mutex<HashMap<String, String>>,
}

impl MemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, device_code: &str) -> Result<Option<Arc<Mutex<DeviceAuthorization>>>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(device_code).cloned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| poisoned())
}

impl AuthorizationStore for MemoryAuthorizationStore {
    fn insert(&self, record: &DeviceAuthorization) -> Result<(), StoreError> {
        let mut user_codes = lock(&self.user_codes)?;
        if let Some(holder) = user_codes.get(&record.user_code) {
            if let Some(existing) = self.entry(holder)? {
                if lock(&existing)?.status.is_active() {
                    return Err(StoreError::Conflict("user_code".to_string()));
                }
            }
        }

        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&record.device_code) {
            return Err(StoreError::Conflict("device_code".to_string()));
        }
        records.insert(
            record.device_code.clone(),
            Arc::new(Mutex::new(record.clone())),
        );
        user_codes.insert(record.user_code.clone(), record.device_code.clone());
        Ok(())
    }

    fn get(&self, device_code: &str) -> Result<Option<DeviceAuthorization>, StoreError> {
        match self.entry(device_code)? {
            Some(entry) => Ok(Some(lock(&entry)?.clone())),
            None => Ok(None),
        }
    }

    fn find_active_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceAuthorization>, StoreError> {
        let device_code = match lock(&self.user_codes)?.get(user_code) {
            Some(device_code) => device_code.clone(),
            None => return Ok(None),
        };
        let Some(entry) = self.entry(&device_code)? else {
            return Ok(None);
        };
        let record = lock(&entry)?;
        Ok(record.status.is_active().then(|| record.clone()))
    }

    fn compare_and_swap(
        &self,
        device_code: &str,
        expected: AuthorizationStatus,
        transition: Transition,
    ) -> Result<CasOutcome, StoreError> {
        let Some(entry) = self.entry(device_code)? else {
            return Ok(CasOutcome::Mismatch(None));
        };
        let mut record = lock(&entry)?;
        if record.status != expected {
            return Ok(CasOutcome::Mismatch(Some(record.clone())));
        }
        let mut next = record.clone();
        if next.apply(transition).is_err() {
            return Ok(CasOutcome::Mismatch(Some(record.clone())));
        }
        *record = next.clone();
        Ok(CasOutcome::Swapped(next))
    }

    fn remove(&self, device_code: &str) -> Result<bool, StoreError> {
        let mut user_codes = lock(&self.user_codes)?;
        let removed = self
            .records
            .write()
            .map_err(|_| poisoned())?
            .remove(device_code);
        let Some(entry) = removed else {
            return Ok(false);
        };
        let user_code = lock(&entry)?.user_code.clone();
        if user_codes.get(&user_code).map(String::as_str) == Some(device_code) {
            user_codes.remove(&user_code);
        }
        Ok(true)
    }

    fn list(&self) -> Result<Vec<DeviceAuthorization>, StoreError> {
        let entries: Vec<_> = self
            .records
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect();
        entries
            .iter()
            .map(|entry| Ok(lock(entry)?.clone()))
            .collect()
    }
}
