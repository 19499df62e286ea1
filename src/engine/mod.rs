mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;
mod reconcile;

pub use error::EngineError;
pub use mutations::UserRemoval;
pub use reconcile::ReconcileReport;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then fsyncs once for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        flush_and_respond(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes never join the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Property rows plus the reservation index, backed by the WAL.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → property id
    pub(super) reservation_to_property: DashMap<Ulid, Ulid>,
    /// Shared by every mutation, taken exclusively by compaction.
    pub(super) compaction_gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

/// Apply a row-level event. The caller holds the row lock.
fn apply_to_property(ps: &mut PropertyState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::PropertyUpdated { property } => {
            ps.property = property.clone();
        }
        Event::ReservationCreated {
            id,
            property_id,
            guest_id,
            span,
            reserved,
        } => {
            ps.reservation = Some(Reservation {
                id: *id,
                property_id: *property_id,
                guest_id: *guest_id,
                span: *span,
                reserved: *reserved,
            });
            index.insert(*id, *property_id);
        }
        Event::ReservationRescheduled { id, span, .. } => {
            if let Some(r) = ps.reservation.as_mut().filter(|r| r.id == *id) {
                r.span = *span;
            }
        }
        Event::ReservationStateChanged { id, reserved, .. } => {
            if let Some(r) = ps.reservation.as_mut().filter(|r| r.id == *id) {
                r.reserved = *reserved;
            }
        }
        Event::ReservationDeleted { id, .. } => {
            if ps.reservation.as_ref().is_some_and(|r| r.id == *id) {
                ps.reservation = None;
            }
            index.remove(id);
        }
        // Row creation and deletion happen at the DashMap level
        Event::PropertyCreated { .. } | Event::PropertyDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_bytes > 0 {
            tracing::warn!(
                "discarding {} bytes of torn WAL tail after {} good events",
                replay.torn_bytes,
                replay.events.len()
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let events = replay.events;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            reservation_to_property: DashMap::new(),
            compaction_gate: RwLock::new(()),
            clock,
        };

        // Sole owner of every row during replay, so try_write never contends.
        // blocking_write would panic here when called from inside the runtime.
        for event in &events {
            match event {
                Event::PropertyCreated { property } => {
                    let row = PropertyState::new(property.clone());
                    engine.state.insert(property.id, Arc::new(RwLock::new(row)));
                }
                Event::PropertyDeleted { id } => {
                    if let Some((_, row)) = engine.state.remove(id)
                        && let Ok(guard) = row.try_read()
                        && let Some(r) = &guard.reservation
                    {
                        engine.reservation_to_property.remove(&r.id);
                    }
                }
                other => {
                    if let Some(property_id) = event_property_id(other)
                        && let Some(row) = engine.get_property_row(&property_id)
                        && let Ok(mut guard) = row.try_write()
                    {
                        apply_to_property(&mut guard, other, &engine.reservation_to_property);
                    }
                }
            }
        }

        tracing::debug!(
            "replayed {} events into {} properties",
            events.len(),
            engine.state.len()
        );
        Ok(engine)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Held for the duration of a mutation so compaction never snapshots
    /// between a WAL append and the state change it records.
    pub(super) async fn write_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.compaction_gate.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_property_row(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_property_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_property
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Write-lock a property row. Returns `None` if the row is missing, or was
    /// deleted while this caller waited for the lock.
    pub(super) async fn lock_property(
        &self,
        id: &Ulid,
    ) -> Option<OwnedRwLockWriteGuard<PropertyState>> {
        let row = self.get_property_row(id)?;
        let guard = row.write_owned().await;
        self.state.contains_key(id).then_some(guard)
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.reservation_to_property);
        Ok(())
    }

    /// Lookup reservation → property, then write-lock that row.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let property_id = self
            .get_property_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let guard = self
            .lock_property(&property_id)
            .await
            .ok_or(EngineError::NotFound(*reservation_id))?;
        if guard.reservation.as_ref().is_some_and(|r| r.id == *reservation_id) {
            Ok(guard)
        } else {
            Err(EngineError::NotFound(*reservation_id))
        }
    }
}

/// Extract the property id from a row-level event.
fn event_property_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::PropertyUpdated { property } => Some(property.id),
        Event::ReservationCreated { property_id, .. }
        | Event::ReservationRescheduled { property_id, .. }
        | Event::ReservationStateChanged { property_id, .. }
        | Event::ReservationDeleted { property_id, .. } => Some(*property_id),
        Event::PropertyCreated { .. } | Event::PropertyDeleted { .. } => None,
    }
}
