use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::models::{DayContext, PersistedSnapshot, Segment, SegmentKind, SequencerSnapshot};

/// What the user is asked when a usable snapshot survived a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOffer {
    pub segment_index: usize,
    pub segment_type: SegmentKind,
    pub seconds_remaining: u32,
    pub expired_while_away: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeChoice {
    Resume,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Start at segment 0. `discarded` is set when a snapshot existed but did
    /// not fit this day.
    Fresh { discarded: bool },
    Offer {
        offer: ResumeOffer,
        /// Paused, with remaining time already adjusted for time away.
        snapshot: SequencerSnapshot,
        segment_started_at: Option<DateTime<Utc>>,
    },
}

/// A running snapshot keeps draining while nobody is looking; a paused one
/// does not.
pub fn effective_seconds_remaining(persisted: &PersistedSnapshot, now: DateTime<Utc>) -> u32 {
    let stored = persisted.snapshot.seconds_remaining;
    if !persisted.snapshot.is_running {
        return stored;
    }
    let away = (now - persisted.last_updated_at).num_seconds().max(0);
    (i64::from(stored) - away).max(0) as u32
}

pub fn evaluate_resume(
    persisted: Option<PersistedSnapshot>,
    context: &DayContext,
    segments: &[Segment],
    now: DateTime<Utc>,
) -> ResumeDecision {
    let Some(persisted) = persisted else {
        return ResumeDecision::Fresh { discarded: false };
    };

    if !context.matches(&persisted.plan_id, &persisted.day_id, persisted.date) {
        info!(
            "Discarding session snapshot for {}/{} on {}; today is {}/{} on {}",
            persisted.plan_id, persisted.day_id, persisted.date, context.plan_id, context.day_id, context.date
        );
        return ResumeDecision::Fresh { discarded: true };
    }

    let index = persisted.snapshot.current_index;
    let Some(segment) = segments.get(index) else {
        info!(
            "Discarding session snapshot at segment {index}; day has {} segments",
            segments.len()
        );
        return ResumeDecision::Fresh { discarded: true };
    };

    if persisted.snapshot.is_finished {
        debug!("Discarding snapshot of an already finished day {}", context.day_id);
        return ResumeDecision::Fresh { discarded: true };
    }

    let seconds_remaining = effective_seconds_remaining(&persisted, now).min(segment.planned_seconds());
    let completed_indices = persisted
        .snapshot
        .completed_indices
        .iter()
        .copied()
        .filter(|completed| *completed < segments.len())
        .collect();

    ResumeDecision::Offer {
        offer: ResumeOffer {
            segment_index: index,
            segment_type: segment.kind,
            seconds_remaining,
            expired_while_away: seconds_remaining == 0,
        },
        snapshot: SequencerSnapshot {
            current_index: index,
            seconds_remaining,
            is_running: false,
            is_finished: false,
            completed_indices,
        },
        segment_started_at: persisted.segment_started_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::collections::BTreeSet;

    fn context() -> DayContext {
        DayContext {
            user_id: "u1".into(),
            plan_id: "plan".into(),
            day_id: "day-1".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            is_final_day: false,
        }
    }

    fn segments() -> Vec<Segment> {
        vec![Segment::work(25), Segment::rest(5), Segment::work(25)]
    }

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn persisted(index: usize, seconds_remaining: u32, is_running: bool) -> PersistedSnapshot {
        PersistedSnapshot::capture(
            &context(),
            &SequencerSnapshot {
                current_index: index,
                seconds_remaining,
                is_running,
                is_finished: false,
                completed_indices: (0..index).collect(),
            },
            Some(t() - Duration::seconds(1_100)),
            t(),
        )
    }

    #[test]
    fn running_snapshot_drains_while_away() {
        let decision = evaluate_resume(
            Some(persisted(0, 400, true)),
            &context(),
            &segments(),
            t() + Duration::seconds(130),
        );
        let ResumeDecision::Offer {
            offer,
            snapshot,
            segment_started_at,
        } = decision
        else {
            panic!("expected an offer");
        };
        assert_eq!(offer.seconds_remaining, 270);
        assert!(!offer.expired_while_away);
        assert_eq!(snapshot.seconds_remaining, 270);
        assert!(!snapshot.is_running);
        assert_eq!(segment_started_at, Some(t() - Duration::seconds(1_100)));
    }

    #[test]
    fn paused_snapshot_keeps_stored_time() {
        let snapshot = persisted(2, 400, false);
        assert_eq!(effective_seconds_remaining(&snapshot, t() + Duration::hours(5)), 400);

        let decision = evaluate_resume(Some(snapshot), &context(), &segments(), t() + Duration::hours(5));
        let ResumeDecision::Offer { offer, snapshot, .. } = decision else {
            panic!("expected an offer");
        };
        assert_eq!(offer.segment_index, 2);
        assert_eq!(offer.segment_type, SegmentKind::Work);
        assert_eq!(snapshot.completed_indices, BTreeSet::from([0, 1]));
    }

    #[test]
    fn running_snapshot_that_ran_out_is_flagged() {
        let decision = evaluate_resume(
            Some(persisted(1, 60, true)),
            &context(),
            &segments(),
            t() + Duration::seconds(600),
        );
        let ResumeDecision::Offer { offer, .. } = decision else {
            panic!("expected an offer");
        };
        assert_eq!(offer.seconds_remaining, 0);
        assert!(offer.expired_while_away);
    }

    #[test]
    fn other_day_or_bad_index_starts_fresh() {
        let mut other_day = persisted(0, 400, false);
        other_day.date = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(
            evaluate_resume(Some(other_day), &context(), &segments(), t()),
            ResumeDecision::Fresh { discarded: true }
        );

        let mut other_plan = persisted(0, 400, false);
        other_plan.plan_id = "other".into();
        assert_eq!(
            evaluate_resume(Some(other_plan), &context(), &segments(), t()),
            ResumeDecision::Fresh { discarded: true }
        );

        assert_eq!(
            evaluate_resume(Some(persisted(3, 400, false)), &context(), &segments(), t()),
            ResumeDecision::Fresh { discarded: true }
        );

        assert_eq!(
            evaluate_resume(None, &context(), &segments(), t()),
            ResumeDecision::Fresh { discarded: false }
        );
    }

    #[test]
    fn finished_snapshot_is_not_offered() {
        let mut finished = persisted(2, 0, false);
        finished.snapshot.is_finished = true;
        assert_eq!(
            evaluate_resume(Some(finished), &context(), &segments(), t()),
            ResumeDecision::Fresh { discarded: true }
        );
    }

    #[test]
    fn clock_skew_does_not_add_time() {
        let snapshot = persisted(0, 400, true);
        assert_eq!(effective_seconds_remaining(&snapshot, t() - Duration::seconds(30)), 400);
    }
}
