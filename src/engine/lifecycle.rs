use crate::model::ReservationStatus;

use super::EngineError;

// ── Approval State Machine ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
        }
    }
}

/// Initial status of a freshly created reservation.
pub fn initial_status(requires_approval: bool) -> ReservationStatus {
    if requires_approval {
        ReservationStatus::Pending
    } else {
        ReservationStatus::Approved
    }
}

/// Apply `action` to `from`. Approved, rejected and cancelled never return to
/// pending; rejected and cancelled are terminal.
pub fn next_status(from: ReservationStatus, action: Transition) -> Result<ReservationStatus, EngineError> {
    use ReservationStatus::*;
    match (from, action) {
        (Pending, Transition::Approve) => Ok(Approved),
        (Pending, Transition::Reject) => Ok(Rejected),
        (Pending | Approved, Transition::Cancel) => Ok(Cancelled),
        _ => Err(EngineError::InvalidTransition { from, action }),
    }
}
