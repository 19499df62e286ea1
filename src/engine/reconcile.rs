use std::time::Instant;

use tracing::{debug, warn};

use crate::model::*;
use crate::observability;

use super::{Engine, lifecycle};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

impl Engine {
    /// Drive every reservation's `reserved` flag to match `now`.
    ///
    /// Walks the whole property set, writes only flags that actually change,
    /// and keeps going when a single write fails. Running it twice with the
    /// same `now` changes nothing the second time.
    pub async fn reconcile(&self, now: Ms) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::default();

        for property_id in self.property_ids() {
            let _permit = self.write_permit().await;
            let Some(mut guard) = self.lock_property(&property_id).await else {
                continue;
            };
            let Some((id, span, reserved)) = guard
                .reservation
                .as_ref()
                .map(|r| (r.id, r.span, r.reserved))
            else {
                continue;
            };
            report.examined += 1;

            let Some(next) = lifecycle::tick_transition(reserved, &span, now) else {
                continue;
            };
            let event = Event::ReservationStateChanged {
                id,
                property_id,
                reserved: next.is_reserved(),
            };
            match self.persist_and_apply(&mut guard, &event).await {
                Ok(()) => {
                    report.changed += 1;
                    debug!("reservation {id} now {next:?}");
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!(observability::RECONCILE_FAILURES_TOTAL).increment(1);
                    warn!("reconcile: could not update reservation {id}: {e}");
                }
            }
        }

        metrics::counter!(observability::RECONCILE_CHANGES_TOTAL).increment(report.changed as u64);
        metrics::histogram!(observability::RECONCILE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        report
    }
}
