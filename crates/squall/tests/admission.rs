//! Admission registry behaviour under load and over time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use squall::registry::{AdmissionRegistry, StreamType};

#[test]
fn capacity_then_release_admits_one_more() {
    let registry = AdmissionRegistry::new(3, Duration::from_secs(60));
    for i in 0..3 {
        assert!(registry.register(format!("st-{i}"), "c", StreamType::Forecast));
    }
    assert!(registry.is_at_capacity());
    assert!(!registry.register("st-3", "c", StreamType::Forecast));
    assert_eq!(registry.total_served(), 3);

    assert!(registry.unregister("st-1"));
    assert!(!registry.is_at_capacity());
    assert!(registry.register("st-3", "c", StreamType::Forecast));
    assert!(!registry.register("st-4", "c", StreamType::Forecast));

    let stats = registry.statistics();
    assert_eq!(stats.active, 3);
    assert_eq!(stats.max, 3);
    assert_eq!(stats.total_served, 4);
}

#[test]
fn concurrent_registration_never_exceeds_capacity() {
    const MAX: usize = 16;
    let registry = AdmissionRegistry::new(MAX, Duration::from_secs(60));
    let barrier = Barrier::new(MAX * 2);
    let admitted = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for i in 0..MAX * 2 {
            let (registry, barrier, admitted) = (&registry, &barrier, &admitted);
            scope.spawn(move || {
                barrier.wait();
                if registry.register(format!("st-{i}"), format!("client-{i}"), StreamType::Chat) {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), MAX);
    assert_eq!(registry.active_count(), MAX);
    assert_eq!(registry.total_served(), MAX as u64);
    assert!(registry.is_at_capacity());
}

#[test]
fn concurrent_churn_keeps_counts_consistent() {
    let registry = AdmissionRegistry::new(4, Duration::from_secs(60));
    std::thread::scope(|scope| {
        for t in 0..8 {
            let registry = &registry;
            scope.spawn(move || {
                for n in 0..200 {
                    let id = format!("st-{t}-{n}");
                    if registry.register(id.clone(), "c", StreamType::Current) {
                        assert!(registry.active_count() <= 4);
                        registry.unregister(&id);
                    }
                }
            });
        }
    });
    assert_eq!(registry.active_count(), 0);
    assert!(registry.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweep_removes_only_expired_and_is_idempotent() {
    let registry = Arc::new(AdmissionRegistry::new(10, Duration::from_millis(500)));
    assert!(registry.register("old", "c", StreamType::Historical));
    tokio::time::advance(Duration::from_millis(400)).await;
    assert!(registry.register("young", "c", StreamType::Historical));
    tokio::time::advance(Duration::from_millis(200)).await;

    assert_eq!(registry.sweep_expired(), 1);
    assert!(!registry.contains("old"));
    assert!(registry.contains("young"));
    assert_eq!(registry.sweep_expired(), 0);
    assert_eq!(registry.total_served(), 2);
}

#[tokio::test]
async fn guard_releases_on_drop_once() {
    let registry = Arc::new(AdmissionRegistry::new(1, Duration::from_secs(60)));
    let mut guard = registry
        .try_acquire("st-g", "c", StreamType::Progress)
        .unwrap();
    assert!(registry.try_acquire("st-h", "c", StreamType::Progress).is_err());
    assert!(guard.release());
    assert!(!guard.release());
    drop(guard);
    assert_eq!(registry.active_count(), 0);
    assert!(registry.try_acquire("st-h", "c", StreamType::Progress).is_ok());
}
