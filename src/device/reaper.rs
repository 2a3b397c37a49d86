//! Background reclamation of stale device authorizations.
//!
//! Running the reaper never changes what `poll` or `approve` answer: it
//! applies the same CAS-guarded expiry they apply lazily, then deletes
//! terminal records once their retention grace has passed.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::clock::{Clock, SystemClock};
use super::codes::fingerprint;
use super::record::{AuthorizationStatus, Transition};
use super::store::{AuthorizationStore, CasOutcome, StoreError};

pub const DEFAULT_RETENTION_SECS: i64 = 3600;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub deleted: usize,
}

pub struct ExpiryReaper {
    store: Arc<dyn AuthorizationStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    period: StdDuration,
}

impl ExpiryReaper {
    pub fn new(store: Arc<dyn AuthorizationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retention: Duration::seconds(DEFAULT_RETENTION_SECS),
            period: StdDuration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_period(mut self, period: StdDuration) -> Self {
        self.period = period;
        self
    }

    /// One pass over the store at the clock's current time.
    pub fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(self.clock.now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        for record in self.store.list()? {
            report.scanned += 1;
            let mut record = record;

            let overdue = record.effective_status(now) == AuthorizationStatus::Expired;
            if record.status.is_active() && overdue {
                match self.store.compare_and_swap(
                    &record.device_code,
                    record.status,
                    Transition::Expire,
                )? {
                    CasOutcome::Swapped(updated) => {
                        report.expired += 1;
                        record = updated;
                    }
                    // Someone else moved it; judge what is there now.
                    CasOutcome::Mismatch(Some(latest)) => record = latest,
                    CasOutcome::Mismatch(None) => continue,
                }
            }

            let reclaimable = record
                .terminal_since()
                .is_some_and(|since| since + self.retention <= now);
            if reclaimable && self.store.remove(&record.device_code)? {
                debug!(
                    record = %fingerprint(&record.device_code),
                    status = %record.status,
                    "reclaimed"
                );
                report.deleted += 1;
            }
        }

        Ok(report)
    }

    /// Run sweeps every `period` until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(period_secs = self.period.as_secs(), "expiry reaper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let reaper = self.clone_handle();
                let result = tokio::task::spawn_blocking(move || reaper.sweep()).await;
                match result {
                    Ok(Ok(report)) if report.expired > 0 || report.deleted > 0 => {
                        info!(
                            scanned = report.scanned,
                            expired = report.expired,
                            deleted = report.deleted,
                            "expiry sweep finished"
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "expiry sweep failed"),
                    Err(e) => error!(error = %e, "expiry sweep panicked"),
                }
            }
            info!("expiry reaper stopped");
        })
    }

    /// Cancel a spawned reaper and wait for it. Returns whether it exited cleanly.
    pub async fn stop(cancel: &CancellationToken, handle: JoinHandle<()>) -> bool {
        cancel.cancel();
        match handle.await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "expiry reaper task failed");
                false
            }
        }
    }

    fn clone_handle(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            retention: self.retention,
            period: self.period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::record::DeviceAuthorization;
    use crate::device::store::MemoryAuthorizationStore;
    use crate::device::IssuedKey;

    fn insert(
        store: &MemoryAuthorizationStore,
        device_code: &str,
        user_code: &str,
        expires_at: DateTime<Utc>,
    ) {
        store
            .insert(&DeviceAuthorization {
                device_code: device_code.to_string(),
                user_code: user_code.to_string(),
                client_name: None,
                status: AuthorizationStatus::Pending,
                issued_key: None,
                created_at: expires_at - Duration::seconds(600),
                expires_at,
                interval_secs: 2,
                approved_at: None,
                consumed_at: None,
            })
            .unwrap();
    }

    #[test]
    fn sweep_expires_then_deletes_after_grace() {
        let store = Arc::new(MemoryAuthorizationStore::new());
        let t0 = Utc::now();
        insert(&store, "dc-old", "BCDFGHJK", t0);
        insert(&store, "dc-new", "LMNPQRST", t0 + Duration::seconds(600));
        let reaper = ExpiryReaper::new(store.clone()).with_retention(Duration::seconds(60));

        let report = reaper.sweep_at(t0 + Duration::seconds(1)).unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 2,
                expired: 1,
                deleted: 0
            }
        );
        assert_eq!(
            store.get("dc-old").unwrap().unwrap().status,
            AuthorizationStatus::Expired
        );

        let report = reaper.sweep_at(t0 + Duration::seconds(61)).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get("dc-old").unwrap().is_none());
        assert!(store.get("dc-new").unwrap().is_some());
    }

    #[test]
    fn consumed_records_are_kept_for_the_grace_period() {
        let store = Arc::new(MemoryAuthorizationStore::new());
        let t0 = Utc::now();
        insert(&store, "dc-1", "BCDFGHJK", t0 + Duration::seconds(600));
        store
            .compare_and_swap(
                "dc-1",
                AuthorizationStatus::Pending,
                Transition::Approve {
                    key: IssuedKey::new("kg-1"),
                    at: t0,
                },
            )
            .unwrap();
        store
            .compare_and_swap(
                "dc-1",
                AuthorizationStatus::Approved,
                Transition::Consume { at: t0 },
            )
            .unwrap();

        let reaper = ExpiryReaper::new(store.clone()).with_retention(Duration::seconds(60));
        // consumed records are never flipped to expired
        let report = reaper.sweep_at(t0 + Duration::seconds(30)).unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(
            store.get("dc-1").unwrap().unwrap().status,
            AuthorizationStatus::Consumed
        );

        let report = reaper.sweep_at(t0 + Duration::seconds(60)).unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn sweeping_twice_is_idempotent() {
        let store = Arc::new(MemoryAuthorizationStore::new());
        let t0 = Utc::now();
        insert(&store, "dc-1", "BCDFGHJK", t0);
        let reaper = ExpiryReaper::new(store.clone());
        let first = reaper.sweep_at(t0).unwrap();
        let second = reaper.sweep_at(t0).unwrap();
        assert_eq!(first.expired, 1);
        assert_eq!(second.expired, 0);
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn spawned_reaper_stops_on_cancel() {
        let store = Arc::new(MemoryAuthorizationStore::new());
        insert(&store, "dc-1", "BCDFGHJK", Utc::now() - Duration::seconds(1));
        let cancel = CancellationToken::new();
        let handle = ExpiryReaper::new(store.clone())
            .with_period(StdDuration::from_secs(1))
            .spawn(cancel.clone());

        // First tick fires immediately.
        for _ in 0..50 {
            if store.get("dc-1").unwrap().unwrap().status == AuthorizationStatus::Expired {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(100)).await;
        }
        assert_eq!(
            store.get("dc-1").unwrap().unwrap().status,
            AuthorizationStatus::Expired
        );

        assert!(ExpiryReaper::stop(&cancel, handle).await);
    }

    #[tokio::test]
    async fn aborted_reaper_reports_unclean_exit() {
        let store = Arc::new(MemoryAuthorizationStore::new());
        let cancel = CancellationToken::new();
        let handle = ExpiryReaper::new(store)
            .with_period(StdDuration::from_secs(3600))
            .spawn(cancel.child_token());
        handle.abort();
        assert!(!ExpiryReaper::stop(&cancel, handle).await);
    }

    #[test]
    fn sweep_reclaims_files_from_the_file_store() {
        use crate::device::file_store::FileAuthorizationStore;

        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FileAuthorizationStore::new(dir.path()));
        let t0 = Utc::now();
        store
            .insert(&DeviceAuthorization {
                device_code: "dc-file".to_string(),
                user_code: "BCDFGHJK".to_string(),
                client_name: None,
                status: AuthorizationStatus::Pending,
                issued_key: None,
                created_at: t0 - Duration::seconds(600),
                expires_at: t0,
                interval_secs: 2,
                approved_at: None,
                consumed_at: None,
            })
            .unwrap();
        let reaper = ExpiryReaper::new(store.clone()).with_retention(Duration::seconds(60));

        let report = reaper.sweep_at(t0 + Duration::seconds(1)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.deleted, 0);

        let report = reaper.sweep_at(t0 + Duration::seconds(60)).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get("dc-file").unwrap().is_none());
        let leftover = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension().and_then(|e| e.to_str())
                    == Some("toml")
            })
            .count();
        assert_eq!(leftover, 0);
    }
}
