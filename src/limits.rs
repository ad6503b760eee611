use crate::model::{DAY_MS, HOUR_MS, Ms};

/// Recurrence interval bounds (every N days/weeks/months).
pub const MIN_RECURRENCE_INTERVAL: u32 = 1;
pub const MAX_RECURRENCE_INTERVAL: u32 = 12;

/// Bounds on `occurrenceCount`. Until-terminated series are truncated at the max too.
pub const MIN_OCCURRENCES: u32 = 1;
pub const MAX_OCCURRENCES: u32 = 365;

/// Preview pagination.
pub const MIN_PAGE: u32 = 1;
pub const MIN_PAGE_LIMIT: u32 = 1;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// How long a waitlist offer stays open before it expires.
pub const DEFAULT_OFFER_TIMEOUT_MS: Ms = 24 * HOUR_MS;

/// How long finished waitlist entries and resolved conflicts are kept.
pub const DEFAULT_RETENTION_MS: Ms = 7 * DAY_MS;

/// Longest single booking window.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;

/// Longest window `free_windows` will scan.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// Valid timestamp range: 2000-01-01 to 2100-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_LABEL_LEN: usize = 1024;
