mod device_support;

use std::sync::{Arc, Barrier};

use chrono::Duration;
use keygate::device::{AuthorizationStatus, DeviceAuthService, ExpiryReaper, PollOutcome};

use device_support::{file_service, memory_service};

const RACERS: usize = 16;

/// Fire `RACERS` polls at the same approved request and collect their answers.
async fn race_polls(service: Arc<DeviceAuthService>, device_code: String) -> Vec<PollOutcome> {
    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            let device_code = device_code.clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                service.poll(&device_code).unwrap()
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(RACERS);
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}

fn assert_single_delivery(outcomes: &[PollOutcome]) {
    let approved = outcomes
        .iter()
        .filter(|o| matches!(o, PollOutcome::Approved { .. }))
        .count();
    let consumed = outcomes
        .iter()
        .filter(|o| **o == PollOutcome::Consumed)
        .count();
    assert_eq!(approved, 1, "outcomes: {outcomes:?}");
    assert_eq!(consumed, RACERS - 1, "outcomes: {outcomes:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_polls_deliver_exactly_once_in_memory() {
    let (_clock, service) = memory_service();
    let service = Arc::new(service);
    let started = service.start(Some("racer")).unwrap();
    service.approve(&started.user_code).unwrap();

    let outcomes = race_polls(service, started.device_code).await;
    assert_single_delivery(&outcomes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_polls_deliver_exactly_once_on_disk() {
    let (_dir, _clock, service) = file_service();
    let service = Arc::new(service);
    let started = service.start(Some("racer")).unwrap();
    service.approve(&started.user_code).unwrap();

    let outcomes = race_polls(service, started.device_code).await;
    assert_single_delivery(&outcomes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_mint_one_key() {
    let (_clock, service) = memory_service();
    let service = Arc::new(service);
    let started = service.start(None).unwrap();

    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            let user_code = started.user_code.clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                service.approve(&user_code).is_ok()
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert!(matches!(
        service.poll(&started.device_code).unwrap(),
        PollOutcome::Approved { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_flows_do_not_interfere() {
    let (_clock, service) = memory_service();
    let service = Arc::new(service);

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let service = service.clone();
            tokio::task::spawn_blocking(move || {
                let started = service.start(Some(&format!("client-{i}"))).unwrap();
                service.approve(&started.user_code).unwrap();
                service.poll(&started.device_code).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            PollOutcome::Approved { .. }
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reaper_racing_polls_never_double_delivers() {
    let (_clock, service) = memory_service();
    let service = Arc::new(service);
    let started = service.start(Some("racer")).unwrap();
    service.approve(&started.user_code).unwrap();

    let record = service.store().get(&started.device_code).unwrap().unwrap();
    let sweep_time = record.expires_at + Duration::seconds(1);
    let reaper = ExpiryReaper::new(service.store().clone());

    // The polls run at the service clock (before expiry); the sweep runs past it.
    let barrier = Arc::new(Barrier::new(RACERS + 1));
    let sweeper = {
        let barrier = barrier.clone();
        tokio::task::spawn_blocking(move || {
            barrier.wait();
            reaper.sweep_at(sweep_time).unwrap()
        })
    };
    let polls: Vec<_> = (0..RACERS)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            let device_code = started.device_code.clone();
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                service.poll(&device_code).unwrap()
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(RACERS);
    for handle in polls {
        outcomes.push(handle.await.unwrap());
    }
    let report = sweeper.await.unwrap();

    let approved = outcomes
        .iter()
        .filter(|o| matches!(o, PollOutcome::Approved { .. }))
        .count();
    assert!(approved <= 1, "outcomes: {outcomes:?}");
    assert!(
        outcomes.iter().all(|o| matches!(
            o,
            PollOutcome::Approved { .. } | PollOutcome::Consumed | PollOutcome::Expired
        )),
        "outcomes: {outcomes:?}"
    );

    let stored = service.store().get(&started.device_code).unwrap().unwrap();
    assert!(stored.status.is_terminal());
    match stored.status {
        AuthorizationStatus::Consumed => {
            assert_eq!(approved, 1);
            assert_eq!(report.expired, 0);
        }
        AuthorizationStatus::Expired => {
            assert_eq!(approved, 0);
            assert_eq!(report.expired, 1);
            assert!(stored.issued_key.is_none());
        }
        other => panic!("expected a terminal status, got {other}"),
    }
}
