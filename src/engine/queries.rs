use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::availability;
use super::slots;
use super::{Engine, EngineError};

impl Engine {
    /// Availability of one amenity on one date, computed from the current
    /// schedule and the reservations still holding time. Read-only.
    pub async fn check_availability(&self, amenity_id: Ulid, date: NaiveDate) -> Result<DayAvailability, EngineError> {
        let st = self
            .get_amenity_state(&amenity_id)
            .ok_or(EngineError::NotFound(amenity_id))?;
        let guard = st.read().await;
        if guard.deleted {
            return Err(EngineError::NotFound(amenity_id));
        }
        Ok(availability(&guard, date, self.clock.today()))
    }

    /// Candidate slots for a date with no booking checks applied.
    pub async fn generate_slots(&self, amenity_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let st = self
            .get_amenity_state(&amenity_id)
            .ok_or(EngineError::NotFound(amenity_id))?;
        let guard = st.read().await;
        Ok(slots::generate(&guard, date))
    }

    pub async fn get_amenity(&self, id: Ulid) -> Result<Amenity, EngineError> {
        let st = self.get_amenity_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = st.read().await;
        Ok(guard.amenity.clone())
    }

    /// All amenities, optionally only those at one location, ordered by id.
    pub async fn list_amenities(&self, location_id: Option<Ulid>) -> Vec<Amenity> {
        let states: Vec<_> = self.amenities.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for st in states {
            let guard = st.read().await;
            if location_id.is_none_or(|loc| guard.amenity.location_id == loc) {
                out.push(guard.amenity.clone());
            }
        }
        out.sort_by_key(|a| a.id);
        out
    }

    pub async fn get_schedules(&self, amenity_id: Ulid) -> Result<Vec<WeeklySchedule>, EngineError> {
        let st = self
            .get_amenity_state(&amenity_id)
            .ok_or(EngineError::NotFound(amenity_id))?;
        let guard = st.read().await;
        Ok(guard.schedules.iter().flatten().copied().collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let amenity_id = self
            .get_amenity_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let st = self
            .get_amenity_state(&amenity_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = st.read().await;
        guard.reservation(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations of an amenity in date then start order, any status.
    pub async fn list_reservations(
        &self,
        amenity_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let st = self
            .get_amenity_state(&amenity_id)
            .ok_or(EngineError::NotFound(amenity_id))?;
        let guard = st.read().await;
        let out = match date {
            Some(d) => guard.reservations.get(&d).cloned().unwrap_or_default(),
            None => guard.reservations.values().flatten().cloned().collect(),
        };
        Ok(out)
    }

    /// Every reservation a resident made, across amenities.
    pub async fn list_user_reservations(&self, user_id: Ulid) -> Vec<Reservation> {
        let states: Vec<_> = self.amenities.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for st in states {
            let guard = st.read().await;
            out.extend(
                guard
                    .reservations
                    .values()
                    .flatten()
                    .filter(|r| r.user_id == user_id)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| (a.date, a.span.start, a.id).cmp(&(b.date, b.span.start, b.id)));
        out
    }
}
