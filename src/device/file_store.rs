use std::collections::HashMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::codes::storage_key;
use super::record::{AuthorizationStatus, DeviceAuthorization, Transition};
use super::store::{AuthorizationStore, CasOutcome, StoreError};

const RECORD_FILE_VERSION: u32 = 1;

/// Durable store keeping one TOML file per authorization.
///
/// File names are the SHA-256 of the device code, so the secret never shows
/// up in a directory listing. Writes go through a temp file and `rename`, so
/// readers never observe a half-written record. Atomicity of
/// [`compare_and_swap`](AuthorizationStore::compare_and_swap) holds within
/// one process; run a single server per directory.
///
/// A consumed record keeps its issued key until the reaper deletes it after
/// the retention grace, so the key stays on disk (mode 0600) for that long.
/// Keep the directory on storage with the same protection as the keys.
///
/// # Example
/// ```no_run
/// use keygate::device::{AuthorizationStore, FileAuthorizationStore};
///
/// let store = FileAuthorizationStore::new("/var/lib/keygate/authorizations");
/// let records = store.list()?;
/// # Ok::<(), keygate::device::StoreError>(())
/// ```
pub struct FileAuthorizationStore {
    base_dir: PathBuf,
    record_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    insert_lock: Mutex<()>,
}

impl FileAuthorizationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            record_locks: Mutex::new(HashMap::new()),
            insert_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, device_code: &str) -> PathBuf {
        self.base_dir.join(format!("{}.toml", storage_key(device_code)))
    }

    fn record_lock(&self, device_code: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self
            .record_locks
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(locks
            .entry(device_code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Drop the lock entry unless another caller still holds it.
    fn forget_lock(&self, device_code: &str, lock: &Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.record_locks.lock() {
            let idle = locks
                .get(device_code)
                .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) == 2);
            if idle {
                locks.remove(device_code);
            }
        }
    }

    fn read_path(path: &Path) -> Result<Option<DeviceAuthorization>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };
        let file: RecordFile = toml::from_str(&raw)?;
        if file.version != RECORD_FILE_VERSION {
            return Err(StoreError::Serialization(format!(
                "Unsupported record file version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(Some(file.record))
    }

    fn write(&self, record: &DeviceAuthorization) -> Result<(), StoreError> {
        let file = RecordFile {
            version: RECORD_FILE_VERSION,
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let serialized = toml::to_string(&file)?;
        atomic_write(&self.record_path(&record.device_code), serialized.as_bytes())
    }
}

impl AuthorizationStore for FileAuthorizationStore {
    fn insert(&self, record: &DeviceAuthorization) -> Result<(), StoreError> {
        let _guard = self
            .insert_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        if self.record_path(&record.device_code).exists() {
            return Err(StoreError::Conflict("device_code".to_string()));
        }
        if self.find_active_by_user_code(&record.user_code)?.is_some() {
            return Err(StoreError::Conflict("user_code".to_string()));
        }
        self.write(record)
    }

    fn get(&self, device_code: &str) -> Result<Option<DeviceAuthorization>, StoreError> {
        Self::read_path(&self.record_path(device_code))
    }

    fn find_active_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceAuthorization>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|record| record.user_code == user_code && record.status.is_active()))
    }

    fn compare_and_swap(
        &self,
        device_code: &str,
        expected: AuthorizationStatus,
        transition: Transition,
    ) -> Result<CasOutcome, StoreError> {
        let lock = self.record_lock(device_code)?;
        let guard = lock
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let Some(current) = self.get(device_code)? else {
            drop(guard);
            self.forget_lock(device_code, &lock);
            return Ok(CasOutcome::Mismatch(None));
        };
        if current.status != expected {
            return Ok(CasOutcome::Mismatch(Some(current)));
        }
        let mut next = current.clone();
        if next.apply(transition).is_err() {
            return Ok(CasOutcome::Mismatch(Some(current)));
        }
        self.write(&next)?;
        Ok(CasOutcome::Swapped(next))
    }

    fn remove(&self, device_code: &str) -> Result<bool, StoreError> {
        let lock = self.record_lock(device_code)?;
        let removed = {
            let _guard = lock
                .lock()
                .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
            match fs::remove_file(self.record_path(device_code)) {
                Ok(()) => true,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
                Err(err) => return Err(StoreError::Io(err.to_string())),
            }
        };
        self.forget_lock(device_code, &lock);
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<DeviceAuthorization>, StoreError> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            match Self::read_path(&path) {
                Ok(Some(record)) => records.push(record),
                // Removed between read_dir and read.
                Ok(None) => {}
                Err(StoreError::Serialization(reason)) => {
                    warn!(
                        path = %path.display(),
                        reason = %reason,
                        "skipping unreadable record file"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    version: u32,
    saved_at: DateTime<Utc>,
    record: DeviceAuthorization,
}

pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        StoreError::Io(format!("Record path {} has no file name", path.display()))
    })?;
    let nonce = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
