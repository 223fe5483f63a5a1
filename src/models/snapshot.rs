use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{DayContext, Segment};

/// Full state of the segment timer at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerSnapshot {
    pub current_index: usize,
    pub seconds_remaining: u32,
    pub is_running: bool,
    pub is_finished: bool,
    pub completed_indices: BTreeSet<usize>,
}

impl SequencerSnapshot {
    pub fn initial(segments: &[Segment]) -> Self {
        match segments.first() {
            Some(first) => Self {
                current_index: 0,
                seconds_remaining: first.planned_seconds(),
                is_running: false,
                is_finished: false,
                completed_indices: BTreeSet::new(),
            },
            None => Self {
                current_index: 0,
                seconds_remaining: 0,
                is_running: false,
                is_finished: true,
                completed_indices: BTreeSet::new(),
            },
        }
    }
}

/// Device-local copy of the timer state, written on every mutation so a
/// reload of the same device can pick the session back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub user_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub snapshot: SequencerSnapshot,
    #[serde(default)]
    pub segment_started_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    pub fn capture(
        context: &DayContext,
        snapshot: &SequencerSnapshot,
        segment_started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: context.user_id.clone(),
            plan_id: context.plan_id.clone(),
            day_id: context.day_id.clone(),
            date: context.date,
            snapshot: snapshot.clone(),
            segment_started_at,
            last_updated_at: now,
        }
    }
}
