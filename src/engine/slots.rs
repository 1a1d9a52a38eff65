use chrono::NaiveDate;

use crate::model::*;

// ── Slot Generator ────────────────────────────────────────────────

/// The operating window and block size for `date`, or `None` when closed.
///
/// `is_24_hours` opens the whole day and ignores both the weekly schedule and
/// `available_hours`. Otherwise `available_hours`, when set, clamps the
/// weekday's window.
pub fn day_window(state: &AmenityState, date: NaiveDate) -> Option<(Span, u32)> {
    let amenity = &state.amenity;
    if amenity.is_24_hours {
        return Some((Span::new(0, MINUTES_PER_DAY), amenity.block_duration_minutes));
    }
    let entry = state.schedule_for(date)?;
    let window = match amenity.available_hours {
        Some(bounds) => entry.window.intersect(&bounds)?,
        None => entry.window,
    };
    Some((window, entry.block_duration_minutes))
}

/// Candidate slots for `date`, ordered by start. Empty when closed.
pub fn generate(state: &AmenityState, date: NaiveDate) -> Vec<Span> {
    match day_window(state, date) {
        Some((window, block)) => partition(window, block),
        None => Vec::new(),
    }
}

/// Split `window` into consecutive full-length blocks. A trailing partial
/// block is dropped, never truncated.
pub fn partition(window: Span, block: u32) -> Vec<Span> {
    if block == 0 {
        return Vec::new();
    }
    let count = window.duration_minutes() / block;
    (0..count)
        .map(|i| {
            let start = window.start + i * block;
            Span::new(start, start + block)
        })
        .collect()
}
