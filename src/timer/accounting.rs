//! Turns a finished work segment into the seconds that get credited.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Upper plausibility bound, in seconds per planned minute.
const MAX_SECONDS_PER_PLANNED_MINUTE: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("implausible duration of {actual_seconds}s for a {planned_minutes}-minute segment")]
pub struct DurationAnomaly {
    pub actual_seconds: i64,
    pub planned_minutes: u32,
}

/// Elapsed seconds between start and end, capped at the planned duration.
/// A segment can be credited under time, never over.
pub fn capped_seconds(started_at: DateTime<Utc>, ended_at: DateTime<Utc>, planned_minutes: u32) -> i64 {
    let elapsed = (ended_at - started_at).num_seconds();
    elapsed.min(i64::from(planned_minutes) * 60)
}

pub fn validate_seconds(actual_seconds: i64, planned_minutes: u32) -> Result<i64, DurationAnomaly> {
    let upper = i64::from(planned_minutes) * MAX_SECONDS_PER_PLANNED_MINUTE;
    if (0..=upper).contains(&actual_seconds) {
        Ok(actual_seconds)
    } else {
        Err(DurationAnomaly {
            actual_seconds,
            planned_minutes,
        })
    }
}

pub fn credited_seconds(
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    planned_minutes: u32,
) -> Result<i64, DurationAnomaly> {
    validate_seconds(capped_seconds(started_at, ended_at, planned_minutes), planned_minutes)
}
