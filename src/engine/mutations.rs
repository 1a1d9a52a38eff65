use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::*;
use super::lifecycle::{initial_status, next_status, Transition};
use super::slots;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Membership ───────────────────────────────────────────

    pub async fn grant_member(&self, user_id: Ulid, location_id: Ulid, role: Role) -> Result<(), EngineError> {
        let _gate = self.begin_write().await;
        let event = Event::MemberGranted { user_id, location_id, role };
        self.wal_append(&event).await?;
        self.apply_membership(&event);
        Ok(())
    }

    pub async fn revoke_member(&self, user_id: Ulid, location_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.begin_write().await;
        if self.role_at(user_id, location_id).is_none() {
            return Err(EngineError::NotFound(user_id));
        }
        let event = Event::MemberRevoked { user_id, location_id };
        self.wal_append(&event).await?;
        self.apply_membership(&event);
        Ok(())
    }

    // ── Schedule Store: amenities ────────────────────────────

    pub async fn create_amenity(&self, amenity: Amenity) -> Result<(), EngineError> {
        validate_amenity(&amenity)?;
        let _gate = self.begin_write().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.amenities.len() >= MAX_AMENITIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        let id = amenity.id;
        if self.amenities.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::AmenityCreated { amenity: amenity.clone() };
        self.wal_append(&event).await?;
        self.amenities
            .insert(id, Arc::new(RwLock::new(AmenityState::new(amenity))));
        self.notify.send(id, &event);
        info!("amenity {id} created");
        Ok(())
    }

    pub async fn update_amenity(&self, id: Ulid, patch: AmenityPatch) -> Result<Amenity, EngineError> {
        let _gate = self.begin_write().await;
        let mut guard = self.lock_amenity(id).await?;
        let mut amenity = guard.amenity.clone();
        patch.apply(&mut amenity);
        validate_amenity(&amenity)?;

        let event = Event::AmenityUpdated { amenity: amenity.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(amenity)
    }

    /// Soft deactivation: existing reservations stay, new ones are refused.
    pub async fn set_amenity_active(&self, id: Ulid, active: bool) -> Result<Amenity, EngineError> {
        let amenity = self
            .update_amenity(
                id,
                AmenityPatch {
                    is_active: Some(active),
                    ..Default::default()
                },
            )
            .await?;
        info!("amenity {id} {}", if active { "activated" } else { "deactivated" });
        Ok(amenity)
    }

    /// Hard delete, only for amenities no reservation has ever referenced.
    pub async fn delete_amenity(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.begin_write().await;
        let _catalog = self.catalog_lock.lock().await;
        let mut guard = self.lock_amenity(id).await?;
        if guard.reservation_count() > 0 {
            return Err(EngineError::HasReservations(id));
        }

        let event = Event::AmenityDeleted { id };
        self.wal_append(&event).await?;
        guard.deleted = true;
        self.amenities.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!("amenity {id} deleted");
        Ok(())
    }

    // ── Schedule Store: weekly windows ───────────────────────

    /// Insert or replace the window for one day of the week.
    pub async fn set_schedule(&self, entry: WeeklySchedule) -> Result<(), EngineError> {
        validate_schedule(&entry)?;
        let _gate = self.begin_write().await;
        let mut guard = self.lock_amenity(entry.amenity_id).await?;
        let event = Event::ScheduleSet { entry };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_schedule(&self, amenity_id: Ulid, day_of_week: u8) -> Result<(), EngineError> {
        let _gate = self.begin_write().await;
        let mut guard = self.lock_amenity(amenity_id).await?;
        let missing = guard
            .schedules
            .get(day_of_week as usize)
            .is_none_or(|s| s.is_none());
        if missing {
            return Err(EngineError::NoSchedule { amenity_id, day_of_week });
        }
        let event = Event::ScheduleRemoved { amenity_id, day_of_week };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Reservation Validator & Writer ───────────────────────

    /// Validate and atomically insert a reservation. The conflict check and the
    /// insert run under the amenity's write lock, so two overlapping requests
    /// can never both succeed.
    pub async fn create_reservation(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        let amenity_id = req.amenity_id;
        let result = self.try_create_reservation(req).await;
        let outcome = match &result {
            Ok(r) => {
                info!(
                    "reservation {} created on amenity {amenity_id} for {} {} ({})",
                    r.id, r.date, r.span, r.status
                );
                "created"
            }
            Err(e) => {
                debug!("reservation on amenity {amenity_id} rejected: {e}");
                e.code()
            }
        };
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_create_reservation(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        check_label(&req.purpose, "purpose too long")?;
        check_label(&req.notes, "notes too long")?;
        let span = Span::try_new(req.start, req.end).ok_or_else(|| {
            EngineError::Validation("start_time must be before end_time, within one day".into())
        })?;

        let state = self
            .get_amenity_state(&req.amenity_id)
            .ok_or(EngineError::NotFound(req.amenity_id))?;

        // One bounded wait covers both the gate and the amenity lock; losing it
        // is reported as a lost race, not a fault.
        let locked = tokio::time::timeout(LOCK_WAIT, async {
            let gate = self.begin_write().await;
            let guard = state.write_owned().await;
            (gate, guard)
        })
        .await;
        let (_gate, mut guard) = locked.map_err(|_| EngineError::SlotTaken(None))?;
        if guard.deleted {
            return Err(EngineError::NotFound(req.amenity_id));
        }

        // 1. existence, access, active
        let amenity = guard.amenity.clone();
        if !self.has_role(req.user_id, amenity.location_id, Role::Resident) {
            return Err(EngineError::Forbidden(req.user_id));
        }
        // 2. booking window (also covers inactive amenities)
        let today = self.clock.today();
        check_booking_window(&amenity, req.date, today)?;
        // 3. slot alignment
        let candidates = slots::generate(&guard, req.date);
        if candidates.is_empty() {
            return Err(EngineError::WindowClosed(UnavailableReason::Closed));
        }
        match_slot_range(&candidates, &span)?;
        // 4. duration bounds
        check_duration(&amenity, &span)?;
        // 5. attendees
        check_attendees(&amenity, req.attendees)?;
        // 6. conflict, under the same lock as the insert
        check_no_conflict(&guard, req.date, &span)?;

        if guard.reservation_count() >= MAX_RESERVATIONS_PER_AMENITY {
            return Err(EngineError::LimitExceeded("too many reservations on amenity"));
        }
        let id = req.id.unwrap_or_else(Ulid::new);
        if self.reservation_to_amenity.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // 7. insert
        let reservation = Reservation {
            id,
            amenity_id: amenity.id,
            user_id: req.user_id,
            date: req.date,
            span,
            attendees: req.attendees,
            status: initial_status(amenity.requires_approval),
            purpose: req.purpose,
            notes: req.notes,
            total_cents: price_cents(&amenity, &span),
            created_at: self.clock.now_ms(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
        };
        let event = Event::ReservationCreated { reservation: reservation.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    // ── Approval State Machine ───────────────────────────────

    pub async fn approve_reservation(&self, id: Ulid, actor: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, actor, Transition::Approve, None).await
    }

    pub async fn reject_reservation(
        &self,
        id: Ulid,
        actor: Ulid,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        check_label(&reason, "rejection reason too long")?;
        self.transition(id, actor, Transition::Reject, reason).await
    }

    /// Cancel as the owning resident or a location administrator.
    pub async fn cancel_reservation(&self, id: Ulid, actor: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, actor, Transition::Cancel, None).await
    }

    async fn transition(
        &self,
        id: Ulid,
        actor: Ulid,
        action: Transition,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let amenity_id = self
            .get_amenity_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let _gate = self.begin_write().await;
        let mut guard = self.lock_amenity(amenity_id).await?;
        let current = guard.reservation(&id).ok_or(EngineError::NotFound(id))?.clone();

        let is_admin = self.has_role(actor, guard.amenity.location_id, Role::Admin);
        let is_owner = current.user_id == actor;
        let allowed = match action {
            Transition::Approve | Transition::Reject => is_admin,
            Transition::Cancel => is_admin || is_owner,
        };
        if !allowed {
            return Err(EngineError::Forbidden(actor));
        }
        if current.date < self.clock.today() {
            return Err(EngineError::Frozen(id));
        }
        next_status(current.status, action)?;

        let at = self.clock.now_ms();
        let event = match action {
            Transition::Approve => Event::ReservationApproved { id, amenity_id, by: actor, at },
            Transition::Reject => Event::ReservationRejected { id, amenity_id, by: actor, at, reason },
            Transition::Cancel => Event::ReservationCancelled { id, amenity_id, by: actor, at },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id}: {} by {actor}", action.as_str());

        guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Reservations are written with their final status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;
        let mut events = Vec::new();

        for entry in self.members.iter() {
            let (user_id, location_id) = *entry.key();
            events.push(Event::MemberGranted { user_id, location_id, role: *entry.value() });
        }

        let states: Vec<_> = self.amenities.iter().map(|e| e.value().clone()).collect();
        for st in states {
            let guard = st.read().await;
            events.push(Event::AmenityCreated { amenity: guard.amenity.clone() });
            for entry in guard.schedules.iter().flatten() {
                events.push(Event::ScheduleSet { entry: *entry });
            }
            for reservation in guard.reservations.values().flatten() {
                events.push(Event::ReservationCreated { reservation: reservation.clone() });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
