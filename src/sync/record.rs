use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DayContext, Segment, SegmentKind, SequencerSnapshot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Running,
    Paused,
    Stopped,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Running => "running",
            RemoteStatus::Paused => "paused",
            RemoteStatus::Stopped => "stopped",
        }
    }
}

/// The part of the shared session record a device writes. The store adds the
/// server timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionState {
    pub plan_id: String,
    pub day_id: String,
    pub date: NaiveDate,
    pub segment_index: usize,
    pub segment_type: SegmentKind,
    pub segment_planned_minutes: u32,
    pub status: RemoteStatus,
    /// Virtual start of the running segment: `now - accumulated_seconds` at
    /// write time. Present iff running.
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub accumulated_seconds: u32,
    pub device_id: String,
}

impl RemoteSessionState {
    pub fn from_snapshot(
        context: &DayContext,
        device_id: &str,
        segment: &Segment,
        snapshot: &SequencerSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let planned = segment.planned_seconds();
        let accumulated = planned.saturating_sub(snapshot.seconds_remaining);

        let (status, started_at, paused_at) = if snapshot.is_running {
            (
                RemoteStatus::Running,
                Some(now - Duration::seconds(i64::from(accumulated))),
                None,
            )
        } else if accumulated > 0 {
            (RemoteStatus::Paused, None, Some(now))
        } else {
            (RemoteStatus::Stopped, None, None)
        };

        Self {
            plan_id: context.plan_id.clone(),
            day_id: context.day_id.clone(),
            date: context.date,
            segment_index: snapshot.current_index,
            segment_type: segment.kind,
            segment_planned_minutes: segment.minutes,
            status,
            started_at,
            paused_at,
            accumulated_seconds: if status == RemoteStatus::Stopped { 0 } else { accumulated },
            device_id: device_id.to_string(),
        }
    }

    pub fn planned_seconds(&self) -> u32 {
        self.segment_planned_minutes.saturating_mul(60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionRecord {
    #[serde(flatten)]
    pub state: RemoteSessionState,
    pub last_updated_at: DateTime<Utc>,
}

impl RemoteSessionRecord {
    pub fn stamped(state: RemoteSessionState, last_updated_at: DateTime<Utc>) -> Self {
        Self {
            state,
            last_updated_at,
        }
    }

    /// Remaining time derived from timestamps only, so a follower that was
    /// suspended cannot drift.
    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> u32 {
        let planned = i64::from(self.state.planned_seconds());
        let remaining = match (self.state.status, self.state.started_at) {
            (RemoteStatus::Running, Some(started_at)) => {
                planned - (now - started_at).num_seconds()
            }
            (RemoteStatus::Running, None) | (RemoteStatus::Paused, _) => {
                planned - i64::from(self.state.accumulated_seconds)
            }
            (RemoteStatus::Stopped, _) => planned,
        };
        remaining.clamp(0, planned) as u32
    }
}

/// Push notification from a remote store subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Upserted(RemoteSessionRecord),
    Deleted { user_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn context() -> DayContext {
        DayContext {
            user_id: "u1".into(),
            plan_id: "plan".into(),
            day_id: "day-3".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            is_final_day: false,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap()
    }

    fn snapshot(seconds_remaining: u32, is_running: bool) -> SequencerSnapshot {
        SequencerSnapshot {
            current_index: 0,
            seconds_remaining,
            is_running,
            is_finished: false,
            completed_indices: BTreeSet::new(),
        }
    }

    #[test]
    fn running_follower_recomputes_from_start_instant() {
        let segment = Segment::work(25);
        let state = RemoteSessionState::from_snapshot(&context(), "device-a", &segment, &snapshot(1_500, true), t0());
        assert_eq!(state.status, RemoteStatus::Running);
        assert_eq!(state.started_at, Some(t0()));
        assert_eq!(state.accumulated_seconds, 0);

        let record = RemoteSessionRecord::stamped(state, t0());
        assert_eq!(record.seconds_remaining_at(t0() + Duration::seconds(600)), 900);
        assert_eq!(record.seconds_remaining_at(t0() + Duration::hours(3)), 0);
    }

    #[test]
    fn paused_follower_matches_running_estimate() {
        let segment = Segment::work(25);
        let paused_at = t0() + Duration::seconds(600);
        let state = RemoteSessionState::from_snapshot(&context(), "device-a", &segment, &snapshot(900, false), paused_at);
        assert_eq!(state.status, RemoteStatus::Paused);
        assert_eq!(state.started_at, None);
        assert_eq!(state.paused_at, Some(paused_at));
        assert_eq!(state.accumulated_seconds, 600);

        let record = RemoteSessionRecord::stamped(state, paused_at);
        // Paused time does not keep draining.
        assert_eq!(record.seconds_remaining_at(paused_at + Duration::hours(2)), 900);
    }

    #[test]
    fn resumed_segment_backdates_start() {
        let segment = Segment::work(25);
        let now = t0() + Duration::seconds(2_000);
        let state = RemoteSessionState::from_snapshot(&context(), "device-a", &segment, &snapshot(900, true), now);
        assert_eq!(state.started_at, Some(now - Duration::seconds(600)));

        let record = RemoteSessionRecord::stamped(state, now);
        assert_eq!(record.seconds_remaining_at(now + Duration::seconds(100)), 800);
    }

    #[test]
    fn untouched_segment_is_stopped() {
        let segment = Segment::rest(5);
        let state = RemoteSessionState::from_snapshot(&context(), "device-a", &segment, &snapshot(300, false), t0());
        assert_eq!(state.status, RemoteStatus::Stopped);
        assert_eq!(state.accumulated_seconds, 0);
        assert_eq!(state.started_at, None);
        assert_eq!(state.paused_at, None);

        let record = RemoteSessionRecord::stamped(state, t0());
        assert_eq!(record.seconds_remaining_at(t0() + Duration::hours(1)), 300);
    }

    #[test]
    fn record_round_trips_as_flat_json() {
        let segment = Segment::work(25);
        let state = RemoteSessionState::from_snapshot(&context(), "device-a", &segment, &snapshot(1_500, true), t0());
        let record = RemoteSessionRecord::stamped(state, t0());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["segmentType"], "work");
        assert_eq!(json["deviceId"], "device-a");
        let back: RemoteSessionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
