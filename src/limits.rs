use crate::model::Ms;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single booking may not be wider than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;
/// Exceptions may close up to a year at once.
pub const MAX_EXCEPTION_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_OCCURRENCES: usize = 50;
pub const MAX_BLOCKS_PER_OWNER: usize = 7 * 24;
pub const MAX_SERVICES_PER_COMPANY: usize = 10_000;
pub const MAX_RESOURCES_PER_COMPANY: usize = 10_000;
pub const MAX_BOOKINGS_PER_COMPANY: usize = 2_000_000;
pub const MAX_WAITLIST_PER_COMPANY: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_TIMEZONE_LEN: usize = 64;

pub const MIN_SLOT_STEP_MINUTES: u32 = 1;
pub const MAX_SLOT_STEP_MINUTES: u32 = 24 * 60;
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;
pub const MAX_LEAD_DAYS: u32 = 5 * 366;

pub const MAX_TENANTS: usize = 4096;
