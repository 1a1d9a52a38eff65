use chrono::{NaiveDate, NaiveTime};

use crate::model::Ms;

/// Source of "today" and "now" for booking-window and audit checks.
///
/// The engine is timezone-naive: `System` reads the host's local date, which is
/// expected to match the locations it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    Fixed { today: NaiveDate, now: Ms },
}

impl Clock {
    /// A frozen clock at local midnight of `today`.
    pub fn fixed(today: NaiveDate) -> Self {
        let now = today.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        Clock::Fixed { today, now }
    }

    pub fn today(&self) -> NaiveDate {
        match self {
            Clock::System => chrono::Local::now().date_naive(),
            Clock::Fixed { today, .. } => *today,
        }
    }

    pub fn now_ms(&self) -> Ms {
        match self {
            Clock::System => chrono::Utc::now().timestamp_millis(),
            Clock::Fixed { now, .. } => *now,
        }
    }
}
