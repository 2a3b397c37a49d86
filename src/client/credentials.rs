use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::file_store::atomic_write;
use crate::device::IssuedKey;
use crate::error::{KeygateError, Result};

const CREDENTIAL_FILE: &str = "credentials.toml";

/// A key obtained through a completed login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub key: IssuedKey,
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub obtained_at: DateTime<Utc>,
}

/// Storage abstraction for the CLI's persisted key.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredCredential>>;
    fn save(&self, credential: &StoredCredential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// TOML file under the credential directory, written atomically with mode 0600.
///
/// # Example
/// ```no_run
/// use keygate::client::{CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new("/tmp/keygate");
/// if let Some(credential) = store.load()? {
///     println!("logged in to {}", credential.server_url);
/// }
/// # Ok::<(), keygate::error::KeygateError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.base_dir.join(CREDENTIAL_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>> {
        let raw = match fs::read_to_string(self.path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: CredentialFile = toml::from_str(&raw).map_err(|err| {
            KeygateError::Configuration(format!("unreadable credential file: {err}"))
        })?;
        Ok(Some(file.credential))
    }

    fn save(&self, credential: &StoredCredential) -> Result<()> {
        let file = CredentialFile {
            version: 1,
            credential: credential.clone(),
        };
        let serialized = toml::to_string(&file).map_err(|err| {
            KeygateError::Configuration(format!("cannot encode credential: {err}"))
        })?;
        atomic_write(&self.path(), serialized.as_bytes())?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    credential: StoredCredential,
}
