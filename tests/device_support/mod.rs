#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use keygate::device::{
    AuthorizationStore, Clock, DeviceAuthService, FileAuthorizationStore, MemoryAuthorizationStore,
};
use tempfile::TempDir;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().expect("clock lock poisoned") += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

/// Service over an in-memory store driven by a manual clock.
pub fn memory_service() -> (Arc<ManualClock>, DeviceAuthService) {
    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn AuthorizationStore> = Arc::new(MemoryAuthorizationStore::new());
    let service = DeviceAuthService::new(store).with_clock(clock.clone());
    (clock, service)
}

/// Service over a file store in a fresh temp dir. Keep the `TempDir` alive.
pub fn file_service() -> (TempDir, Arc<ManualClock>, DeviceAuthService) {
    let dir = TempDir::new().expect("temp dir");
    let clock = Arc::new(ManualClock::new());
    let store: Arc<dyn AuthorizationStore> = Arc::new(FileAuthorizationStore::new(dir.path()));
    let service = DeviceAuthService::new(store).with_clock(clock.clone());
    (dir, clock, service)
}
