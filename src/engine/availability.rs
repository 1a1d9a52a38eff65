use chrono::{Days, NaiveDate};

use crate::model::*;

use super::slots;

// ── Availability Calculator ───────────────────────────────────────

/// Whole-day checks shared by availability reads and reservation writes.
/// Order: inactive, past, beyond horizon.
pub fn day_status(amenity: &Amenity, date: NaiveDate, today: NaiveDate) -> Result<(), UnavailableReason> {
    if !amenity.is_active {
        return Err(UnavailableReason::AmenityInactive);
    }
    if date < today {
        return Err(UnavailableReason::PastDate);
    }
    let horizon = today.checked_add_days(Days::new(amenity.advance_booking_days as u64));
    if horizon.is_none_or(|last| date > last) {
        return Err(UnavailableReason::BeyondBookingWindow);
    }
    Ok(())
}

/// Compute the day's bookability and mark each candidate slot against the
/// reservations that still hold time on that date.
pub fn availability(state: &AmenityState, date: NaiveDate, today: NaiveDate) -> DayAvailability {
    if let Err(reason) = day_status(&state.amenity, date, today) {
        return DayAvailability::unavailable(reason);
    }
    let candidates = slots::generate(state, date);
    if candidates.is_empty() {
        return DayAvailability::unavailable(UnavailableReason::Closed);
    }

    let mut busy: Vec<Span> = state
        .reservations
        .get(&date)
        .into_iter()
        .flatten()
        .filter(|r| r.status.holds_slot())
        .map(|r| r.span)
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    // Both lists are sorted: walk them together.
    let mut bi = 0;
    let slots = candidates
        .into_iter()
        .map(|span| {
            while bi < busy.len() && busy[bi].end <= span.start {
                bi += 1;
            }
            let taken = bi < busy.len() && busy[bi].overlaps(&span);
            Slot { span, available: !taken }
        })
        .collect();

    DayAvailability {
        available: true,
        reason: None,
        slots,
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}
