/// Upper bound on a product's per-day capacity.
pub const MAX_CAPACITY: u32 = 100_000;

/// Max units a single booking may request.
pub const MAX_UNITS_PER_BOOKING: i64 = 1_000;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_PRODUCTS: usize = 10_000;

/// Widest inclusive date range a single availability query may cover.
pub const MAX_RANGE_DAYS: i64 = 400;

/// Max rows a single `insert_many` call may create. A year of dates plus slack.
pub const MAX_INSERT_BATCH: usize = 800;

/// How far ahead the replenisher keeps availability populated.
pub const REPLENISH_HORIZON_MONTHS: u32 = 12;

/// Largest WAL frame accepted on replay; anything bigger is treated as corruption.
pub const MAX_WAL_FRAME_BYTES: usize = 16 * 1024 * 1024;
