//! Timestamp helpers
//!
//! Every timestamp the service persists is truncated to whole milliseconds and
//! stored as milliseconds since the Unix epoch, so a value read back from the
//! store compares equal to the value a client echoes as a fencing token.

use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Longest quota period a key may carry, about one hundred years
pub const MAX_PERIOD_DAYS: i64 = 36_500;

/// Current time at millisecond precision
pub fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Timestamp out of range: {}", ms))
}

/// Midnight UTC of the day containing `ts`
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Rollover boundary `days` whole days after the start of `ts`'s day, or
/// `None` when it falls outside the representable range
pub fn days_after_start_of_day(ts: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    start_of_day(ts).checked_add_signed(TimeDelta::try_days(days)?)
}

pub fn next_utc_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    days_after_start_of_day(ts, 1).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Delay from `ts` to the next UTC midnight, recomputed from the wall clock on
/// every call rather than accumulated.
pub fn until_next_midnight(ts: DateTime<Utc>) -> Duration {
    (next_utc_midnight(ts) - ts).to_std().unwrap_or(Duration::ZERO)
}

/// The fencing token for a write replacing a record last written at
/// `previous`. Strictly greater than `previous` so that two writes landing in
/// the same millisecond still produce distinct tokens.
pub fn next_fence(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + TimeDelta::milliseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}
