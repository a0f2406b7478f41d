//! Hard bounds on inputs. Everything a caller can size is capped here.

/// Max length of a participant/staff reference.
pub const MAX_REF_LEN: usize = 64;

/// Max length of the resource and activity labels.
pub const MAX_LABEL_LEN: usize = 120;

/// Max length of the free-text notes field.
pub const MAX_NOTES_LEN: usize = 2_000;

/// Max length of a search string.
pub const MAX_SEARCH_LEN: usize = 200;

/// Upper bound on `limit` in a list query.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Widest report range, inclusive, in days.
pub const MAX_REPORT_RANGE_DAYS: i64 = 366;

/// Bookings dated outside this year range are rejected.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Prices above this are assumed to be input errors.
pub const MAX_PRICE: f64 = 1_000_000.0;

/// Upper bound on the configured per-slot capacity.
pub const MAX_SLOT_CAPACITY: u32 = 1_000;

/// Max bytes in a single wire protocol line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
