use crate::model::Ms;

const DAY_MS: Ms = 24 * 60 * 60 * 1000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_SERVICES_PER_BOOKING: usize = 16;

/// Appointments plus blocked times held by one store.
pub const MAX_RECORDS: usize = 1_000_000;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single appointment or block.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
/// Widest range a listing query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
