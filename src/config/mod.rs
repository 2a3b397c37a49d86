//! Configuration system (layered: defaults < env < code).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::device::reaper::{DEFAULT_REAP_INTERVAL_SECS, DEFAULT_RETENTION_SECS};
use crate::device::service::{
    DEFAULT_CLIENT_NAME_MAX_LEN, DEFAULT_INTERVAL_SECS, DEFAULT_TTL_SECS,
    DEFAULT_VERIFICATION_URI,
};
use crate::device::FlowSettings;
use crate::error::{KeygateError, Result};

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8787";

/// Server and client settings.
///
/// Resolution order:
/// 1. Values set in code (`with_*`)
/// 2. `KEYGATE_*` environment variables (a `.env` file is loaded first)
/// 3. Built-in defaults
#[derive(Debug, Clone)]
pub struct KeygateConfig {
    pub ttl: Duration,
    pub interval_secs: u64,
    pub verification_uri: String,
    pub client_name_max_len: usize,
    pub retention: Duration,
    pub reap_interval: StdDuration,
    pub bind: SocketAddr,
    pub store_dir: PathBuf,
    pub credential_dir: PathBuf,
    pub server_url: String,
}

impl Default for KeygateConfig {
    fn default() -> Self {
        let home = default_keygate_dir();
        Self {
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            interval_secs: DEFAULT_INTERVAL_SECS,
            verification_uri: DEFAULT_VERIFICATION_URI.to_string(),
            client_name_max_len: DEFAULT_CLIENT_NAME_MAX_LEN,
            retention: Duration::seconds(DEFAULT_RETENTION_SECS),
            reap_interval: StdDuration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            store_dir: home.join("authorizations"),
            credential_dir: home,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

impl KeygateConfig {
    /// Load from environment variables (`KEYGATE_TTL_SECS`, `KEYGATE_BIND`, ...).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<i64>(&lookup, "KEYGATE_TTL_SECS")? {
            if secs <= 0 {
                return Err(KeygateError::Configuration(
                    "KEYGATE_TTL_SECS must be positive".to_string(),
                ));
            }
            config.ttl = Duration::seconds(secs);
        }
        if let Some(secs) = parse_var(&lookup, "KEYGATE_INTERVAL_SECS")? {
            config.interval_secs = secs;
        }
        if let Some(uri) = lookup("KEYGATE_VERIFICATION_URI") {
            config.verification_uri = uri;
        }
        if let Some(len) = parse_var(&lookup, "KEYGATE_CLIENT_NAME_MAX_LEN")? {
            config.client_name_max_len = len;
        }
        if let Some(secs) = parse_var::<i64>(&lookup, "KEYGATE_RETENTION_SECS")? {
            config.retention = Duration::seconds(secs.max(0));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "KEYGATE_REAP_INTERVAL_SECS")? {
            config.reap_interval = StdDuration::from_secs(secs.max(1));
        }
        if let Some(bind) = parse_var(&lookup, "KEYGATE_BIND")? {
            config.bind = bind;
        }
        if let Some(dir) = lookup("KEYGATE_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("KEYGATE_CREDENTIAL_DIR") {
            config.credential_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("KEYGATE_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn with_credential_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credential_dir = dir.into();
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Settings applied to newly issued authorizations.
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings::builder()
            .ttl(self.ttl)
            .interval_secs(self.interval_secs)
            .verification_uri(self.verification_uri.clone())
            .client_name_max_len(self.client_name_max_len)
            .build()
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            KeygateError::Configuration(format!("{key} has an invalid value: {raw:?}"))
        }),
    }
}

fn default_keygate_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".keygate"))
        .unwrap_or_else(|| PathBuf::from(".keygate"))
}
