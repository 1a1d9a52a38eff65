use std::time::Duration;

// Hard caps applied at the engine and tenant boundaries.

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_AMENITIES_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_AMENITY: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;

/// Longest booking horizon an amenity may declare.
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 730;

pub const MIN_BLOCK_MINUTES: u32 = 5;
pub const MAX_BLOCK_MINUTES: u32 = 1440;

/// Duration bounds are whole hours within one day.
pub const MAX_DURATION_HOURS: u32 = 24;
/// 10 000.00 per hour.
pub const MAX_HOURLY_RATE_CENTS: u64 = 1_000_000;

/// A reservation covers at most this many consecutive slots.
pub const MAX_SLOTS_PER_RESERVATION: usize = 2;

/// Bounded wait for an amenity's write lock.
pub const LOCK_WAIT: Duration = Duration::from_secs(2);
