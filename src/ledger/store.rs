use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{db::NewWorkLog, models::DayContext};

/// Durable, append-only record of credited work segments.
#[async_trait]
pub trait WorkLogStore: Send + Sync {
    /// Segment indices already logged for the day.
    async fn logged_indices(&self, day_id: &str) -> Result<Vec<usize>>;

    /// Returns `false` when the segment was already logged, possibly by
    /// another device. Fails when `actual_seconds` is negative.
    async fn append(&self, entry: &NewWorkLog) -> Result<bool>;
}

/// Day/plan completion bookkeeping.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn day_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()>;

    async fn plan_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()>;
}
