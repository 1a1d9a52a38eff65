mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod slots;

pub use availability::{availability, day_status, merge_overlapping};
pub use error::EngineError;
pub use lifecycle::{initial_status, next_status, Transition};
pub use slots::{day_window, generate, partition};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::warn;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::LOCK_WAIT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedAmenityState = Arc<RwLock<AmenityState>>;

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
/// Blocks for the first append, drains whatever else is already queued, then
/// fsyncs once for the whole batch and answers every sender.
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
                    // Commit what we have before compacting or reporting.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes can't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Err(ref e) = result {
        warn!("WAL batch of {} failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal
                .write_compact_file(&events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

pub struct Engine {
    pub(super) amenities: DashMap<Ulid, SharedAmenityState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → amenity id.
    pub(super) reservation_to_amenity: DashMap<Ulid, Ulid>,
    /// (user, location) → role.
    pub(super) members: DashMap<(Ulid, Ulid), Role>,
    /// Every write holds this shared; compaction takes it exclusively so the
    /// snapshot it writes cannot miss an in-flight event.
    pub(super) write_gate: RwLock<()>,
    /// Serializes amenity create and delete, which change the map's key set.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) clock: Clock,
}

/// Apply an amenity-scoped event to its state (caller holds the lock).
fn apply_to_amenity(st: &mut AmenityState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AmenityUpdated { amenity } => {
            st.amenity = amenity.clone();
        }
        Event::ScheduleSet { entry } => {
            st.schedules[entry.day_of_week as usize] = Some(*entry);
        }
        Event::ScheduleRemoved { day_of_week, .. } => {
            st.schedules[*day_of_week as usize] = None;
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.amenity_id);
            st.insert_reservation(reservation.clone());
        }
        Event::ReservationApproved { id, by, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::Approved;
                r.approved_by = Some(*by);
                r.approved_at = Some(*at);
            }
        }
        Event::ReservationRejected { id, by, at, reason, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::Rejected;
                r.rejected_by = Some(*by);
                r.rejected_at = Some(*at);
                r.rejection_reason = reason.clone();
            }
        }
        Event::ReservationCancelled { id, by, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_by = Some(*by);
                r.cancelled_at = Some(*at);
            }
        }
        // Handled at the map level, not here
        Event::AmenityCreated { .. }
        | Event::AmenityDeleted { .. }
        | Event::MemberGranted { .. }
        | Event::MemberRevoked { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Clock::System)
    }

    pub fn with_clock(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Clock) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            amenities: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_amenity: DashMap::new(),
            members: DashMap::new(),
            write_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
            clock,
        };

        // Sole owner of these Arcs, so try_write cannot fail. No blocking_write:
        // lazy tenant creation runs this inside the runtime.
        for event in &events {
            match event {
                Event::AmenityCreated { amenity } => {
                    let st = AmenityState::new(amenity.clone());
                    engine.amenities.insert(amenity.id, Arc::new(RwLock::new(st)));
                }
                Event::AmenityDeleted { id } => {
                    engine.amenities.remove(id);
                }
                Event::MemberGranted { .. } | Event::MemberRevoked { .. } => {
                    engine.apply_membership(event);
                }
                other => {
                    let Some(amenity_id) = other.amenity_id() else { continue };
                    if let Some(entry) = engine.amenities.get(&amenity_id) {
                        let st = entry.value().clone();
                        match st.try_write() {
                            Ok(mut guard) => {
                                apply_to_amenity(&mut guard, other, &engine.reservation_to_amenity)
                            }
                            Err(_) => warn!("replay: amenity {amenity_id} unexpectedly locked"),
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    fn apply_membership(&self, event: &Event) {
        match event {
            Event::MemberGranted { user_id, location_id, role } => {
                self.members.insert((*user_id, *location_id), *role);
            }
            Event::MemberRevoked { user_id, location_id } => {
                self.members.remove(&(*user_id, *location_id));
            }
            _ => {}
        }
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

    pub fn get_amenity_state(&self, id: &Ulid) -> Option<SharedAmenityState> {
        self.amenities.get(id).map(|e| e.value().clone())
    }

    pub fn get_amenity_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_amenity.get(reservation_id).map(|e| *e.value())
    }

    pub fn role_at(&self, user_id: Ulid, location_id: Ulid) -> Option<Role> {
        self.members.get(&(user_id, location_id)).map(|e| *e.value())
    }

    pub(super) fn has_role(&self, user_id: Ulid, location_id: Ulid, required: Role) -> bool {
        self.role_at(user_id, location_id)
            .is_some_and(|role| role.satisfies(required))
    }

    /// Shared side of the write gate. Taken before any amenity lock.
    pub(super) async fn begin_write(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut AmenityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_amenity(st, event, &self.reservation_to_amenity);
        self.notify.send(st.amenity.id, event);
        Ok(())
    }

    /// Acquire an amenity's write lock, waiting at most `LOCK_WAIT`.
    pub(super) async fn lock_amenity(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<AmenityState>, EngineError> {
        let st = self.get_amenity_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = tokio::time::timeout(LOCK_WAIT, st.write_owned())
            .await
            .map_err(|_| EngineError::LockTimeout(id))?;
        if guard.deleted {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }
}
