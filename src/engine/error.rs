use ulid::Ulid;

use crate::model::{ReservationStatus, UnavailableReason};

use super::lifecycle::Transition;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-range input.
    Validation(String),
    NotFound(Ulid),
    NoSchedule {
        amenity_id: Ulid,
        day_of_week: u8,
    },
    /// Actor lacks the location role or ownership the operation needs.
    Forbidden(Ulid),
    WindowClosed(UnavailableReason),
    InvalidRange(&'static str),
    /// Lost the race for the requested slots. `None` when the amenity's write
    /// lock could not be acquired in time.
    SlotTaken(Option<Ulid>),
    InvalidTransition {
        from: ReservationStatus,
        action: Transition,
    },
    /// The reservation date is in the past; its record is frozen.
    Frozen(Ulid),
    AlreadyExists(Ulid),
    HasReservations(Ulid),
    LockTimeout(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) | EngineError::NoSchedule { .. } => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::WindowClosed(_) => "window_closed",
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::SlotTaken(_) => "slot_taken",
            EngineError::InvalidTransition { .. } | EngineError::Frozen(_) => "invalid_transition",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::HasReservations(_) => "has_reservations",
            EngineError::LockTimeout(_) => "lock_timeout",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: ", self.code())?;
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::NotFound(id) => write!(f, "{id}"),
            EngineError::NoSchedule { amenity_id, day_of_week } => {
                write!(f, "no schedule for amenity {amenity_id} on day {day_of_week}")
            }
            EngineError::Forbidden(actor) => write!(f, "actor {actor} may not perform this operation"),
            EngineError::WindowClosed(reason) => write!(f, "{}", reason.as_str()),
            EngineError::InvalidRange(msg) => write!(f, "{msg}"),
            EngineError::SlotTaken(Some(id)) => write!(f, "conflicts with reservation {id}"),
            EngineError::SlotTaken(None) => write!(f, "amenity busy, please re-select"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {} a {from} reservation", action.as_str())
            }
            EngineError::Frozen(id) => write!(f, "reservation {id} is in the past"),
            EngineError::AlreadyExists(id) => write!(f, "{id}"),
            EngineError::HasReservations(id) => {
                write!(f, "amenity {id} is referenced by reservations; deactivate it instead")
            }
            EngineError::LockTimeout(id) => write!(f, "timed out waiting for amenity {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "{msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
