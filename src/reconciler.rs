use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{Engine, ReconcileReport};

/// One reconciliation pass at the engine clock's current time.
pub async fn reconcile_once(engine: &Engine) -> ReconcileReport {
    let now = engine.now_ms();
    let report = engine.reconcile(now).await;
    if report.changed > 0 || report.failed > 0 {
        info!(
            "reconciled {} reservations: {} changed, {} failed",
            report.examined, report.changed, report.failed
        );
    } else {
        debug!("reconciled {} reservations, no changes", report.examined);
    }
    report
}

/// Background task that keeps every `reserved` flag in step with the clock.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        reconcile_once(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::{Principal, Role};
    use crate::model::*;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use ulid::Ulid;

    const D: Ms = DAY_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayd_test_reconciler");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_reservation(name: &str, clock: Arc<ManualClock>) -> (Arc<Engine>, Ulid) {
        let engine = Arc::new(Engine::new(test_wal_path(name), clock).unwrap());
        let host = Principal::new(Ulid::new(), Role::Host);
        let pid = Ulid::new();
        engine
            .create_property(
                &host,
                NewProperty {
                    available: Some(true),
                    cancellation_policy: CancellationPolicy::Paid,
                    ..NewProperty::new(pid, "Chalet", dec!(90.00), Span::new(0, 30 * D))
                },
            )
            .await
            .unwrap();
        let rid = Ulid::new();
        engine
            .create_reservation(
                &Principal::new(Ulid::new(), Role::Guest),
                NewReservation {
                    id: rid,
                    property_id: pid,
                    reservation_from: 4 * D,
                    reservation_to: 9 * D,
                },
            )
            .await
            .unwrap();
        (engine, rid)
    }

    #[tokio::test]
    async fn reconcile_once_reads_engine_clock() {
        let clock = Arc::new(ManualClock::new(D));
        let (engine, rid) = engine_with_reservation("once.wal", clock.clone()).await;

        // Before the stay: unreserved.
        let report = reconcile_once(&engine).await;
        assert_eq!(report.changed, 1);
        assert!(!engine.get_reservation(rid).await.unwrap().reserved);

        // During the stay: reserved again.
        clock.set(5 * D);
        reconcile_once(&engine).await;
        assert!(engine.get_reservation(rid).await.unwrap().reserved);

        // Same instant twice: nothing to do.
        assert_eq!(reconcile_once(&engine).await.changed, 0);
    }

    #[tokio::test]
    async fn background_task_flips_flags() {
        let clock = Arc::new(ManualClock::new(20 * D));
        let (engine, rid) = engine_with_reservation("task.wal", clock).await;
        assert!(engine.get_reservation(rid).await.unwrap().reserved);

        let task = tokio::spawn(run_reconciler(engine.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert!(!engine.get_reservation(rid).await.unwrap().reserved);
    }
}
