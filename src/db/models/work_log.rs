//! Rows of the durable work log: one per credited work segment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SegmentKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkLog {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub segment_index: usize,
    pub segment_type: SegmentKind,
    pub planned_minutes: u32,
    pub actual_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Write request for the log. `actual_seconds` stays signed so the store can
/// reject negative durations instead of having them wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkLog {
    pub user_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub segment_index: usize,
    pub segment_type: SegmentKind,
    pub planned_minutes: u32,
    pub actual_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
