//! Idempotent crediting of completed work segments, plus the day/plan
//! completion side effects that hang off the last one.

pub mod store;

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use thiserror::Error;

use crate::{
    db::NewWorkLog,
    models::{final_work_index, DayContext, Segment},
    timer::accounting::{credited_seconds, DurationAnomaly},
};

pub use store::{CompletionSink, WorkLogStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("segment {index} not recorded: {source}")]
    Anomaly {
        index: usize,
        #[source]
        source: DurationAnomaly,
    },
    #[error("segment {index} could not be written to the work log: {source:#}")]
    Store {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// A work segment whose countdown ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedWork {
    pub index: usize,
    pub segment: Segment,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    AlreadyLogged,
    Logged {
        actual_seconds: u32,
        day_completed: bool,
        plan_completed: bool,
    },
}

pub struct CompletionLedger {
    context: DayContext,
    final_work_index: Option<usize>,
    logged: BTreeSet<usize>,
    day_completion_fired: bool,
    store: Arc<dyn WorkLogStore>,
    sink: Arc<dyn CompletionSink>,
}

impl CompletionLedger {
    /// Reads the day's logged indices once. A failed read starts from an
    /// empty set; the store's uniqueness still prevents double rows.
    pub async fn seed(
        context: DayContext,
        segments: &[Segment],
        store: Arc<dyn WorkLogStore>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        let logged: BTreeSet<usize> = match store.logged_indices(&context.day_id).await {
            Ok(indices) => indices.into_iter().collect(),
            Err(err) => {
                warn!("Failed to read work logs for day {}: {err:#}", context.day_id);
                BTreeSet::new()
            }
        };

        let final_work_index = final_work_index(segments);
        let day_completion_fired = final_work_index.is_some_and(|index| logged.contains(&index));

        info!(
            "Ledger for day {} seeded with {} logged segment(s)",
            context.day_id,
            logged.len()
        );

        Self {
            context,
            final_work_index,
            logged,
            day_completion_fired,
            store,
            sink,
        }
    }

    pub fn is_logged(&self, index: usize) -> bool {
        self.logged.contains(&index)
    }

    pub fn logged_indices(&self) -> &BTreeSet<usize> {
        &self.logged
    }

    pub async fn log_segment(&mut self, work: CompletedWork) -> Result<LogOutcome, LedgerError> {
        let index = work.index;
        if self.logged.contains(&index) {
            return Ok(LogOutcome::AlreadyLogged);
        }

        let actual_seconds = credited_seconds(work.started_at, work.ended_at, work.segment.minutes)
            .map_err(|source| LedgerError::Anomaly { index, source })?;

        let entry = NewWorkLog {
            user_id: self.context.user_id.clone(),
            plan_id: self.context.plan_id.clone(),
            day_id: self.context.day_id.clone(),
            segment_index: index,
            segment_type: work.segment.kind,
            planned_minutes: work.segment.minutes,
            actual_seconds,
            started_at: work.started_at,
            ended_at: work.ended_at,
        };
        let inserted = self
            .store
            .append(&entry)
            .await
            .map_err(|source| LedgerError::Store { index, source })?;
        self.logged.insert(index);
        if !inserted {
            // Another device credited it first and owns the completion calls.
            if Some(index) == self.final_work_index {
                self.day_completion_fired = true;
            }
            return Ok(LogOutcome::AlreadyLogged);
        }

        let (day_completed, plan_completed) = if Some(index) == self.final_work_index {
            self.complete_day(work.ended_at).await
        } else {
            (false, false)
        };

        Ok(LogOutcome::Logged {
            // Validated non-negative and bounded above.
            actual_seconds: actual_seconds as u32,
            day_completed,
            plan_completed,
        })
    }

    async fn complete_day(&mut self, at: DateTime<Utc>) -> (bool, bool) {
        if self.day_completion_fired {
            return (false, false);
        }
        self.day_completion_fired = true;

        let day_completed = match self.sink.day_completed(&self.context, at).await {
            Ok(()) => {
                info!("Day {} completed", self.context.day_id);
                true
            }
            Err(err) => {
                error!("Failed to mark day {} complete: {err:#}", self.context.day_id);
                false
            }
        };

        if !self.context.is_final_day {
            return (day_completed, false);
        }

        let plan_completed = match self.sink.plan_completed(&self.context, at).await {
            Ok(()) => {
                info!("Plan {} completed", self.context.plan_id);
                true
            }
            Err(err) => {
                error!("Failed to mark plan {} complete: {err:#}", self.context.plan_id);
                false
            }
        };
        (day_completed, plan_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryWorkLogStore, RecordingCompletionSink};
    use chrono::{Duration, NaiveDate, TimeZone};

    fn context(is_final_day: bool) -> DayContext {
        DayContext {
            user_id: "u1".into(),
            plan_id: "plan".into(),
            day_id: "day-1".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            is_final_day,
        }
    }

    fn segments() -> Vec<Segment> {
        vec![Segment::work(20), Segment::rest(5), Segment::work(20)]
    }

    fn work(index: usize, elapsed: i64) -> CompletedWork {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        CompletedWork {
            index,
            segment: segments()[index],
            started_at,
            ended_at: started_at + Duration::seconds(elapsed),
        }
    }

    async fn ledger(
        is_final_day: bool,
        store: &MemoryWorkLogStore,
        sink: &RecordingCompletionSink,
    ) -> CompletionLedger {
        CompletionLedger::seed(
            context(is_final_day),
            &segments(),
            Arc::new(store.clone()),
            Arc::new(sink.clone()),
        )
        .await
    }

    #[tokio::test]
    async fn final_segment_logged_twice_completes_day_once() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut ledger = ledger(false, &store, &sink).await;

        let first = ledger.log_segment(work(2, 1_200)).await.unwrap();
        assert_eq!(
            first,
            LogOutcome::Logged {
                actual_seconds: 1_200,
                day_completed: true,
                plan_completed: false
            }
        );
        assert_eq!(ledger.log_segment(work(2, 1_200)).await.unwrap(), LogOutcome::AlreadyLogged);

        assert_eq!(store.entries().len(), 1);
        assert_eq!(sink.days(), vec!["day-1".to_string()]);
        assert!(sink.plans().is_empty());
    }

    #[tokio::test]
    async fn final_day_also_completes_plan() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut ledger = ledger(true, &store, &sink).await;

        ledger.log_segment(work(0, 1_200)).await.unwrap();
        assert!(sink.days().is_empty());

        let outcome = ledger.log_segment(work(2, 1_200)).await.unwrap();
        assert!(matches!(
            outcome,
            LogOutcome::Logged {
                day_completed: true,
                plan_completed: true,
                ..
            }
        ));
        assert_eq!(sink.plans(), vec!["plan".to_string()]);
    }

    #[tokio::test]
    async fn overrun_is_capped_at_planned_duration() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut ledger = ledger(false, &store, &sink).await;

        ledger.log_segment(work(0, 1_500)).await.unwrap();
        assert_eq!(store.entries()[0].actual_seconds, 1_200);
    }

    #[tokio::test]
    async fn negative_duration_is_an_anomaly_and_not_written() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut ledger = ledger(false, &store, &sink).await;

        let err = ledger.log_segment(work(0, -5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Anomaly { index: 0, .. }));
        assert!(store.entries().is_empty());
        assert!(!ledger.is_logged(0));
    }

    #[tokio::test]
    async fn failed_write_leaves_index_unlogged() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut ledger = ledger(false, &store, &sink).await;

        store.set_failing(true);
        let err = ledger.log_segment(work(0, 1_200)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store { index: 0, .. }));
        assert!(!ledger.is_logged(0));

        store.set_failing(false);
        assert!(matches!(
            ledger.log_segment(work(0, 1_200)).await.unwrap(),
            LogOutcome::Logged { .. }
        ));
        assert!(ledger.is_logged(0));
    }

    #[tokio::test]
    async fn completion_failures_are_swallowed() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        sink.set_failing(true);
        let mut ledger = ledger(true, &store, &sink).await;

        let outcome = ledger.log_segment(work(2, 1_200)).await.unwrap();
        assert_eq!(
            outcome,
            LogOutcome::Logged {
                actual_seconds: 1_200,
                day_completed: false,
                plan_completed: false
            }
        );
        assert!(ledger.is_logged(2));
    }

    #[tokio::test]
    async fn seeding_picks_up_earlier_logs() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut first = ledger(false, &store, &sink).await;
        first.log_segment(work(0, 1_200)).await.unwrap();
        first.log_segment(work(2, 1_200)).await.unwrap();

        let mut second = ledger(false, &store, &sink).await;
        assert_eq!(second.logged_indices(), &BTreeSet::from([0, 2]));
        assert_eq!(second.log_segment(work(2, 1_200)).await.unwrap(), LogOutcome::AlreadyLogged);
        assert_eq!(sink.days().len(), 1);
    }

    #[tokio::test]
    async fn segment_logged_elsewhere_after_seeding_is_not_credited_again() {
        let store = MemoryWorkLogStore::default();
        let sink = RecordingCompletionSink::default();
        let mut leader = ledger(false, &store, &sink).await;
        let mut follower = ledger(false, &store, &sink).await;

        assert!(matches!(
            leader.log_segment(work(2, 1_200)).await.unwrap(),
            LogOutcome::Logged { day_completed: true, .. }
        ));
        assert_eq!(follower.log_segment(work(2, 1_190)).await.unwrap(), LogOutcome::AlreadyLogged);
        assert!(follower.is_logged(2));

        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()[0].actual_seconds, 1_200);
        assert_eq!(sink.days(), vec!["day-1".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_log_store_seeds_empty() {
        let store = MemoryWorkLogStore::default();
        store.set_failing(true);
        let sink = RecordingCompletionSink::default();
        let ledger = ledger(false, &store, &sink).await;
        assert!(ledger.logged_indices().is_empty());
    }
}
