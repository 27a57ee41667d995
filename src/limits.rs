use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Year used as the concrete end of unbounded timeframes.
pub const FAR_FUTURE_YEAR: i32 = 9999;

/// Default and export page size for paginated range scans.
pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Days handled per call by the day-by-day export unless it runs as a background job.
pub const EXPORT_ITERATION_DAYS: usize = 25;

/// Widest window accepted by day listings and unpaginated range queries.
pub const MAX_QUERY_DAYS: i64 = 366 * 5;

/// Gap between two bookings still treated as one chain.
pub const CHAIN_ADJACENCY_SECS: i64 = 60;
pub const MAX_CHAIN_LENGTH: usize = 512;

pub const MAX_RULE_PARAMS: usize = 3;
pub const MAX_COMMENT_LEN: usize = 4_096;

pub fn far_future() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(FAR_FUTURE_YEAR, 12, 31)
        .unwrap_or(NaiveDate::MAX)
        .and_time(NaiveTime::MIN)
}
