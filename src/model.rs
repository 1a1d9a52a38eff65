use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Audit timestamps only.
pub type Ms = i64;

/// Minutes since local midnight. `24:00` is 1440.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 1440;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied bounds.
    pub fn try_new(start: Minutes, end: Minutes) -> Option<Self> {
        (start < end && end <= MINUTES_PER_DAY).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection of two spans, if non-empty.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", format_time(self.start), format_time(self.end))
    }
}

// ── Wall-clock parsing ───────────────────────────────────────────

/// Parse `HH:MM` or `HH:MM:SS` into minutes since midnight. Seconds must be zero;
/// `24:00` is accepted as the end-of-day boundary.
pub fn parse_time(s: &str) -> Result<Minutes, String> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(format!("bad time {s:?}: expected HH:MM[:SS]"));
    }
    let field = |p: &str, name: &str| -> Result<u32, String> {
        if p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("bad time {s:?}: {name} must be two digits"));
        }
        p.parse::<u32>().map_err(|e| format!("bad time {s:?}: {e}"))
    };
    let hours = field(parts[0], "hours")?;
    let minutes = field(parts[1], "minutes")?;
    let seconds = if parts.len() == 3 { field(parts[2], "seconds")? } else { 0 };
    if minutes > 59 || seconds > 59 {
        return Err(format!("bad time {s:?}: out of range"));
    }
    if seconds != 0 {
        return Err(format!("bad time {s:?}: seconds must be zero"));
    }
    let total = hours * 60 + minutes;
    if total > MINUTES_PER_DAY {
        return Err(format!("bad time {s:?}: past 24:00"));
    }
    Ok(total)
}

pub fn format_time(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("bad date {s:?}: {e}"))
}

/// Day of week with 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

// ── Amenities ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmenityCategory {
    Pool,
    Gym,
    Court,
    Bbq,
    Salon,
    Playground,
    Terrace,
    Garden,
    Parking,
    Other,
}

impl AmenityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmenityCategory::Pool => "pool",
            AmenityCategory::Gym => "gym",
            AmenityCategory::Court => "court",
            AmenityCategory::Bbq => "bbq",
            AmenityCategory::Salon => "salon",
            AmenityCategory::Playground => "playground",
            AmenityCategory::Terrace => "terrace",
            AmenityCategory::Garden => "garden",
            AmenityCategory::Parking => "parking",
            AmenityCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "pool" => AmenityCategory::Pool,
            "gym" => AmenityCategory::Gym,
            "court" => AmenityCategory::Court,
            "bbq" => AmenityCategory::Bbq,
            "salon" => AmenityCategory::Salon,
            "playground" => AmenityCategory::Playground,
            "terrace" => AmenityCategory::Terrace,
            "garden" => AmenityCategory::Garden,
            "parking" => AmenityCategory::Parking,
            "other" => AmenityCategory::Other,
            _ => return None,
        })
    }
}

/// A bookable common area owned by one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub id: Ulid,
    pub location_id: Ulid,
    pub name: String,
    pub category: AmenityCategory,
    /// Max attendees per reservation.
    pub capacity: u32,
    pub is_paid: bool,
    pub hourly_rate_cents: u64,
    pub min_duration_hours: Option<u32>,
    pub max_duration_hours: Option<u32>,
    /// Booking horizon: reservations may be made up to today + this many days.
    pub advance_booking_days: u32,
    pub requires_approval: bool,
    /// Open [00:00, 24:00) every day; weekly schedules are ignored.
    pub is_24_hours: bool,
    /// `available_from`/`available_until`: clamps every daily window when set.
    pub available_hours: Option<Span>,
    /// Block size used when `is_24_hours` is set.
    pub block_duration_minutes: u32,
    pub is_active: bool,
}

impl Amenity {
    pub fn new(id: Ulid, location_id: Ulid, name: impl Into<String>) -> Self {
        Self {
            id,
            location_id,
            name: name.into(),
            category: AmenityCategory::Other,
            capacity: 1,
            is_paid: false,
            hourly_rate_cents: 0,
            min_duration_hours: None,
            max_duration_hours: None,
            advance_booking_days: 30,
            requires_approval: false,
            is_24_hours: false,
            available_hours: None,
            block_duration_minutes: 60,
            is_active: true,
        }
    }
}

/// Partial update of an amenity. `None` leaves a field unchanged; for the
/// nullable fields, `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmenityPatch {
    pub name: Option<String>,
    pub category: Option<AmenityCategory>,
    pub capacity: Option<u32>,
    pub is_paid: Option<bool>,
    pub hourly_rate_cents: Option<u64>,
    pub min_duration_hours: Option<Option<u32>>,
    pub max_duration_hours: Option<Option<u32>>,
    pub advance_booking_days: Option<u32>,
    pub requires_approval: Option<bool>,
    pub is_24_hours: Option<bool>,
    pub available_hours: Option<Option<Span>>,
    pub block_duration_minutes: Option<u32>,
    pub is_active: Option<bool>,
}

impl AmenityPatch {
    pub fn is_empty(&self) -> bool {
        *self == AmenityPatch::default()
    }

    pub fn apply(self, a: &mut Amenity) {
        if let Some(v) = self.name {
            a.name = v;
        }
        if let Some(v) = self.category {
            a.category = v;
        }
        if let Some(v) = self.capacity {
            a.capacity = v;
        }
        if let Some(v) = self.is_paid {
            a.is_paid = v;
        }
        if let Some(v) = self.hourly_rate_cents {
            a.hourly_rate_cents = v;
        }
        if let Some(v) = self.min_duration_hours {
            a.min_duration_hours = v;
        }
        if let Some(v) = self.max_duration_hours {
            a.max_duration_hours = v;
        }
        if let Some(v) = self.advance_booking_days {
            a.advance_booking_days = v;
        }
        if let Some(v) = self.requires_approval {
            a.requires_approval = v;
        }
        if let Some(v) = self.is_24_hours {
            a.is_24_hours = v;
        }
        if let Some(v) = self.available_hours {
            a.available_hours = v;
        }
        if let Some(v) = self.block_duration_minutes {
            a.block_duration_minutes = v;
        }
        if let Some(v) = self.is_active {
            a.is_active = v;
        }
    }
}

/// Operating window for one day of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub amenity_id: Ulid,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub window: Span,
    pub block_duration_minutes: u32,
}

/// A derived bookable block. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub available: bool,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "pending" => ReservationStatus::Pending,
            "approved" => ReservationStatus::Approved,
            "rejected" => ReservationStatus::Rejected,
            "cancelled" | "canceled" => ReservationStatus::Cancelled,
            _ => return None,
        })
    }

    /// Pending and approved reservations hold their slots.
    pub fn holds_slot(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub amenity_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub attendees: u32,
    pub status: ReservationStatus,
    pub purpose: Option<String>,
    pub notes: Option<String>,
    pub total_cents: u64,
    pub created_at: Ms,
    pub approved_by: Option<Ulid>,
    pub approved_at: Option<Ms>,
    pub rejected_by: Option<Ulid>,
    pub rejected_at: Option<Ms>,
    pub rejection_reason: Option<String>,
    pub cancelled_by: Option<Ulid>,
    pub cancelled_at: Option<Ms>,
}

/// Caller-supplied booking request. Every field is re-validated by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Option<Ulid>,
    pub amenity_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub start: Minutes,
    pub end: Minutes,
    pub attendees: u32,
    pub purpose: Option<String>,
    pub notes: Option<String>,
}

// ── Membership ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Resident,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "resident" => Some(Role::Resident),
            "admin" | "administrator" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Admins may do anything a resident may.
    pub fn satisfies(&self, required: Role) -> bool {
        matches!((self, required), (Role::Admin, _) | (Role::Resident, Role::Resident))
    }
}

// ── Per-amenity state ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AmenityState {
    pub amenity: Amenity,
    /// Indexed by day of week (0 = Sunday).
    pub schedules: [Option<WeeklySchedule>; 7],
    /// All reservations (any status) by date, each list sorted by `span.start`.
    pub reservations: BTreeMap<NaiveDate, Vec<Reservation>>,
    /// Reservation id → date, for lookups by id.
    dates: HashMap<Ulid, NaiveDate>,
    /// Set when the amenity is removed while a handle to it is still held.
    pub deleted: bool,
}

impl AmenityState {
    pub fn new(amenity: Amenity) -> Self {
        Self {
            amenity,
            schedules: [None; 7],
            reservations: BTreeMap::new(),
            dates: HashMap::new(),
            deleted: false,
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.dates.len()
    }

    /// Insert a reservation keeping the per-date list sorted by start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        self.dates.insert(reservation.id, reservation.date);
        let day = self.reservations.entry(reservation.date).or_default();
        let pos = day
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        let date = self.dates.get(id)?;
        self.reservations.get(date)?.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        let date = self.dates.get(id)?;
        self.reservations.get_mut(date)?.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations on `date` whose span overlaps `query`, any status.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Reservation> {
        let day: &[Reservation] = self.reservations.get(&date).map(Vec::as_slice).unwrap_or(&[]);
        let right_bound = day.partition_point(|r| r.span.start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Overlapping reservations that still hold their slot.
    pub fn holding(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Reservation> {
        self.overlapping(date, query).filter(|r| r.status.holds_slot())
    }

    pub fn schedule_for(&self, date: NaiveDate) -> Option<&WeeklySchedule> {
        self.schedules[day_of_week(date) as usize].as_ref()
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// Every state change, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MemberGranted {
        user_id: Ulid,
        location_id: Ulid,
        role: Role,
    },
    MemberRevoked {
        user_id: Ulid,
        location_id: Ulid,
    },
    AmenityCreated {
        amenity: Amenity,
    },
    AmenityUpdated {
        amenity: Amenity,
    },
    AmenityDeleted {
        id: Ulid,
    },
    ScheduleSet {
        entry: WeeklySchedule,
    },
    ScheduleRemoved {
        amenity_id: Ulid,
        day_of_week: u8,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationApproved {
        id: Ulid,
        amenity_id: Ulid,
        by: Ulid,
        at: Ms,
    },
    ReservationRejected {
        id: Ulid,
        amenity_id: Ulid,
        by: Ulid,
        at: Ms,
        reason: Option<String>,
    },
    ReservationCancelled {
        id: Ulid,
        amenity_id: Ulid,
        by: Ulid,
        at: Ms,
    },
}

impl Event {
    /// Short name used in notification payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MemberGranted { .. } => "member_granted",
            Event::MemberRevoked { .. } => "member_revoked",
            Event::AmenityCreated { .. } => "amenity_created",
            Event::AmenityUpdated { .. } => "amenity_updated",
            Event::AmenityDeleted { .. } => "amenity_deleted",
            Event::ScheduleSet { .. } => "schedule_set",
            Event::ScheduleRemoved { .. } => "schedule_removed",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationApproved { .. } => "reservation_approved",
            Event::ReservationRejected { .. } => "reservation_rejected",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
        }
    }

    /// The amenity an event belongs to; membership events have none.
    pub fn amenity_id(&self) -> Option<Ulid> {
        match self {
            Event::AmenityCreated { amenity } | Event::AmenityUpdated { amenity } => Some(amenity.id),
            Event::AmenityDeleted { id } => Some(*id),
            Event::ScheduleSet { entry } => Some(entry.amenity_id),
            Event::ScheduleRemoved { amenity_id, .. }
            | Event::ReservationApproved { amenity_id, .. }
            | Event::ReservationRejected { amenity_id, .. }
            | Event::ReservationCancelled { amenity_id, .. } => Some(*amenity_id),
            Event::ReservationCreated { reservation } => Some(reservation.amenity_id),
            Event::MemberGranted { .. } | Event::MemberRevoked { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Why a whole day cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    AmenityInactive,
    PastDate,
    BeyondBookingWindow,
    Closed,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::AmenityInactive => "amenity_inactive",
            UnavailableReason::PastDate => "past_date",
            UnavailableReason::BeyondBookingWindow => "beyond_booking_window",
            UnavailableReason::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub available: bool,
    pub reason: Option<UnavailableReason>,
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            slots: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn reservation(d: NaiveDate, start: Minutes, end: Minutes, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            amenity_id: Ulid::new(),
            user_id: Ulid::new(),
            date: d,
            span: Span::new(start, end),
            attendees: 1,
            status,
            purpose: None,
            notes: None,
            total_cents: 0,
            created_at: 0,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_by: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(540, 600);
        let b = Span::new(570, 630);
        let c = Span::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.duration_minutes(), 60);
    }

    #[test]
    fn span_try_new_rejects_inverted_and_past_midnight() {
        assert!(Span::try_new(600, 540).is_none());
        assert!(Span::try_new(600, 600).is_none());
        assert!(Span::try_new(0, MINUTES_PER_DAY + 1).is_none());
        assert_eq!(Span::try_new(0, MINUTES_PER_DAY), Some(Span::new(0, 1440)));
    }

    #[test]
    fn span_intersect_and_contains() {
        let day = Span::new(480, 1200);
        assert_eq!(day.intersect(&Span::new(420, 540)), Some(Span::new(480, 540)));
        assert_eq!(day.intersect(&Span::new(1200, 1260)), None);
        assert!(day.contains_span(&Span::new(480, 1200)));
        assert!(!day.contains_span(&Span::new(470, 500)));
    }

    #[test]
    fn parse_time_forms() {
        assert_eq!(parse_time("08:00"), Ok(480));
        assert_eq!(parse_time("14:30:00"), Ok(870));
        assert_eq!(parse_time("24:00"), Ok(1440));
        assert!(parse_time("24:01").is_err());
        assert!(parse_time("8:00").is_err());
        assert!(parse_time("08:60").is_err());
        assert!(parse_time("08:00:30").is_err());
        assert!(parse_time("noon").is_err());
    }

    #[test]
    fn format_time_pads() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(545), "09:05");
        assert_eq!(format_time(1440), "24:00");
    }

    #[test]
    fn day_of_week_starts_on_sunday() {
        assert_eq!(day_of_week(date("2024-06-02")), 0); // Sunday
        assert_eq!(day_of_week(date("2024-06-01")), 6); // Saturday
        assert_eq!(day_of_week(date("2024-06-03")), 1);
    }

    #[test]
    fn category_and_status_names() {
        assert_eq!(AmenityCategory::parse("BBQ"), Some(AmenityCategory::Bbq));
        assert_eq!(AmenityCategory::parse("spa"), None);
        assert_eq!(ReservationStatus::parse("canceled"), Some(ReservationStatus::Cancelled));
        assert!(ReservationStatus::Pending.holds_slot());
        assert!(!ReservationStatus::Rejected.holds_slot());
    }

    #[test]
    fn role_satisfies() {
        assert!(Role::Admin.satisfies(Role::Resident));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Resident.satisfies(Role::Resident));
        assert!(!Role::Resident.satisfies(Role::Admin));
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut a = Amenity::new(Ulid::new(), Ulid::new(), "Pool");
        AmenityPatch {
            capacity: Some(12),
            min_duration_hours: Some(Some(1)),
            ..Default::default()
        }
        .apply(&mut a);
        assert_eq!(a.capacity, 12);
        assert_eq!(a.min_duration_hours, Some(1));
        assert_eq!(a.name, "Pool");
        assert!(AmenityPatch::default().is_empty());
    }

    #[test]
    fn reservations_kept_sorted_per_date() {
        let d = date("2024-06-01");
        let mut st = AmenityState::new(Amenity::new(Ulid::new(), Ulid::new(), "Gym"));
        st.insert_reservation(reservation(d, 720, 780, ReservationStatus::Approved));
        st.insert_reservation(reservation(d, 540, 600, ReservationStatus::Approved));
        st.insert_reservation(reservation(d, 600, 660, ReservationStatus::Pending));
        let starts: Vec<_> = st.reservations[&d].iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![540, 600, 720]);
        assert_eq!(st.reservation_count(), 3);
    }

    #[test]
    fn overlapping_is_scoped_to_date_and_half_open() {
        let d = date("2024-06-01");
        let other = date("2024-06-02");
        let mut st = AmenityState::new(Amenity::new(Ulid::new(), Ulid::new(), "Court"));
        st.insert_reservation(reservation(d, 540, 600, ReservationStatus::Approved));
        st.insert_reservation(reservation(other, 600, 660, ReservationStatus::Approved));

        assert_eq!(st.overlapping(d, &Span::new(570, 660)).count(), 1);
        assert_eq!(st.overlapping(d, &Span::new(600, 660)).count(), 0);
        assert_eq!(st.overlapping(other, &Span::new(0, 1440)).count(), 1);
    }

    #[test]
    fn holding_ignores_released_reservations() {
        let d = date("2024-06-01");
        let mut st = AmenityState::new(Amenity::new(Ulid::new(), Ulid::new(), "Salon"));
        st.insert_reservation(reservation(d, 540, 600, ReservationStatus::Cancelled));
        st.insert_reservation(reservation(d, 540, 600, ReservationStatus::Rejected));
        assert_eq!(st.overlapping(d, &Span::new(540, 600)).count(), 2);
        assert_eq!(st.holding(d, &Span::new(540, 600)).count(), 0);
    }

    #[test]
    fn reservation_lookup_by_id() {
        let d = date("2024-06-01");
        let mut st = AmenityState::new(Amenity::new(Ulid::new(), Ulid::new(), "Terrace"));
        let r = reservation(d, 540, 600, ReservationStatus::Pending);
        let id = r.id;
        st.insert_reservation(r);
        st.reservation_mut(&id).unwrap().status = ReservationStatus::Approved;
        assert_eq!(st.reservation(&id).unwrap().status, ReservationStatus::Approved);
        assert!(st.reservation(&Ulid::new()).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(date("2024-06-01"), 840, 900, ReservationStatus::Approved),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.kind(), "reservation_created");
    }
}
