use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::day_status;
use super::EngineError;

pub(crate) fn check_label(label: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if label.as_ref().is_some_and(|l| l.len() > MAX_LABEL_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Same whole-day checks as availability reads, surfaced as `window_closed`.
pub(crate) fn check_booking_window(amenity: &Amenity, date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    day_status(amenity, date, today).map_err(EngineError::WindowClosed)
}

/// The requested range must be exactly one or more consecutive candidate
/// slots, capped at `MAX_SLOTS_PER_RESERVATION`. Returns the slot count.
pub(crate) fn match_slot_range(candidates: &[Span], requested: &Span) -> Result<usize, EngineError> {
    let first = candidates
        .iter()
        .position(|s| s.start == requested.start)
        .ok_or(EngineError::InvalidRange("start_time is not on a slot boundary"))?;

    let mut end = candidates[first].end;
    let mut count = 1;
    while end < requested.end {
        let next = candidates
            .get(first + count)
            .ok_or(EngineError::InvalidRange("end_time is past the last slot"))?;
        if next.start != end {
            return Err(EngineError::InvalidRange("slots are not consecutive"));
        }
        end = next.end;
        count += 1;
        if count > MAX_SLOTS_PER_RESERVATION {
            return Err(EngineError::InvalidRange("too many slots in one reservation"));
        }
    }
    if end != requested.end {
        return Err(EngineError::InvalidRange("end_time is not on a slot boundary"));
    }
    Ok(count)
}

pub(crate) fn check_duration(amenity: &Amenity, requested: &Span) -> Result<(), EngineError> {
    let minutes = u64::from(requested.duration_minutes());
    if let Some(min) = amenity.min_duration_hours
        && minutes < u64::from(min) * 60 {
            return Err(EngineError::InvalidRange("shorter than the minimum duration"));
        }
    if let Some(max) = amenity.max_duration_hours
        && minutes > u64::from(max) * 60 {
            return Err(EngineError::InvalidRange("longer than the maximum duration"));
        }
    Ok(())
}

pub(crate) fn check_attendees(amenity: &Amenity, attendees: u32) -> Result<(), EngineError> {
    if attendees == 0 {
        return Err(EngineError::Validation("attendees must be positive".into()));
    }
    if attendees > amenity.capacity {
        return Err(EngineError::Validation(format!(
            "{attendees} attendees exceed capacity {}",
            amenity.capacity
        )));
    }
    Ok(())
}

/// Any reservation still holding time that overlaps `span` is a conflict.
/// Caller must hold the amenity's write lock.
pub(crate) fn check_no_conflict(state: &AmenityState, date: NaiveDate, span: &Span) -> Result<(), EngineError> {
    match state.holding(date, span).next() {
        Some(existing) => Err(EngineError::SlotTaken(Some(existing.id))),
        None => Ok(()),
    }
}

/// Price in cents: hourly rate prorated by the minute.
pub(crate) fn price_cents(amenity: &Amenity, span: &Span) -> u64 {
    if !amenity.is_paid {
        return 0;
    }
    amenity
        .hourly_rate_cents
        .saturating_mul(u64::from(span.duration_minutes()))
        / 60
}

/// Amenity definitions an administrator may store.
pub(crate) fn validate_amenity(amenity: &Amenity) -> Result<(), EngineError> {
    if amenity.name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if amenity.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("amenity name too long"));
    }
    if amenity.capacity == 0 {
        return Err(EngineError::Validation("capacity must be positive".into()));
    }
    if amenity.advance_booking_days > MAX_ADVANCE_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("advance_booking_days too large"));
    }
    check_block(amenity.block_duration_minutes)?;
    for hours in [amenity.min_duration_hours, amenity.max_duration_hours].into_iter().flatten() {
        if hours > MAX_DURATION_HOURS {
            return Err(EngineError::Validation(format!(
                "duration hours {hours} exceed {MAX_DURATION_HOURS}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (amenity.min_duration_hours, amenity.max_duration_hours)
        && min > max {
            return Err(EngineError::Validation(
                "min_duration_hours exceeds max_duration_hours".into(),
            ));
        }
    if amenity.is_paid && amenity.hourly_rate_cents == 0 {
        return Err(EngineError::Validation("paid amenity needs an hourly_rate".into()));
    }
    if amenity.hourly_rate_cents > MAX_HOURLY_RATE_CENTS {
        return Err(EngineError::LimitExceeded("hourly_rate too large"));
    }
    Ok(())
}

pub(crate) fn validate_schedule(entry: &WeeklySchedule) -> Result<(), EngineError> {
    if entry.day_of_week > 6 {
        return Err(EngineError::Validation(format!(
            "day_of_week {} out of range 0..6",
            entry.day_of_week
        )));
    }
    if entry.window.start >= entry.window.end || entry.window.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("start_time must be before end_time".into()));
    }
    check_block(entry.block_duration_minutes)?;
    if entry.block_duration_minutes > entry.window.duration_minutes() {
        return Err(EngineError::Validation(
            "block_duration_minutes is longer than the window".into(),
        ));
    }
    Ok(())
}

fn check_block(block: u32) -> Result<(), EngineError> {
    if !(MIN_BLOCK_MINUTES..=MAX_BLOCK_MINUTES).contains(&block) {
        return Err(EngineError::Validation(format!(
            "block_duration_minutes must be within {MIN_BLOCK_MINUTES}..={MAX_BLOCK_MINUTES}"
        )));
    }
    Ok(())
}
