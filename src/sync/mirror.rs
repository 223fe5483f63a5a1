use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::{
    models::{DayContext, Segment, SequencerSnapshot},
    timer::ExternalPatch,
};

use super::{RemoteSessionRecord, RemoteSessionState, RemoteSessionStore};

/// Why an incoming record was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherDay,
    OwnWrite,
    NotNewerThanLocalWrite,
    WriteInFlight,
    IndexOutOfRange,
    Retired,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IgnoreReason::OtherDay => "targets another plan or day",
            IgnoreReason::OwnWrite => "echo of this device's write",
            IgnoreReason::NotNewerThanLocalWrite => "not newer than last local write",
            IgnoreReason::WriteInFlight => "local write in flight",
            IgnoreReason::IndexOutOfRange => "segment index out of range",
            IgnoreReason::Retired => "session already finished",
        };
        f.write_str(reason)
    }
}

/// This device's side of the shared session record.
///
/// Writes happen on control actions and index transitions only; reads turn a
/// pushed record into an [`ExternalPatch`] with remaining time re-derived
/// from timestamps. Conflicts resolve last-writer-wins.
pub struct RemoteSessionMirror {
    store: Arc<dyn RemoteSessionStore>,
    context: DayContext,
    device_id: String,
    write_timeout: Duration,
    last_local_write: Option<DateTime<Utc>>,
    write_in_flight: Arc<AtomicBool>,
    retired: bool,
}

impl RemoteSessionMirror {
    pub fn new(
        store: Arc<dyn RemoteSessionStore>,
        context: DayContext,
        device_id: String,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            context,
            device_id,
            write_timeout,
            last_local_write: None,
            write_in_flight: Arc::new(AtomicBool::new(false)),
            retired: false,
        }
    }

    /// Shared flag so a subscription can drop pushes without waiting on the
    /// session lock.
    pub fn write_in_flight_flag(&self) -> Arc<AtomicBool> {
        self.write_in_flight.clone()
    }

    /// Stops all further writes; used once the day is finished or the view
    /// is closed.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// An explicit reset starts a new session that may be mirrored again.
    pub fn reopen(&mut self) {
        self.retired = false;
    }

    pub async fn publish(
        &mut self,
        segment: &Segment,
        snapshot: &SequencerSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.retired || snapshot.is_finished {
            debug!("Skipping remote write for retired session {}", self.context.day_id);
            return Ok(());
        }

        let state = RemoteSessionState::from_snapshot(&self.context, &self.device_id, segment, snapshot, now);
        self.last_local_write = Some(now);

        self.write_in_flight.store(true, Ordering::SeqCst);
        let result = tokio::time::timeout(
            self.write_timeout,
            self.store.upsert(&self.context.user_id, state),
        )
        .await;
        self.write_in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(Ok(record)) => {
                debug!(
                    "Mirrored segment {} ({}) for {}",
                    record.state.segment_index,
                    record.state.status.as_str(),
                    self.context.user_id
                );
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(anyhow!(
                "remote session write timed out after {}ms",
                self.write_timeout.as_millis()
            )),
        }
    }

    pub async fn clear(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.last_local_write = Some(now);
        self.write_in_flight.store(true, Ordering::SeqCst);
        let result = tokio::time::timeout(
            self.write_timeout,
            self.store.delete(&self.context.user_id),
        )
        .await;
        self.write_in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!(
                "remote session delete timed out after {}ms",
                self.write_timeout.as_millis()
            )),
        }
    }

    /// Turns a pushed record into a patch, or says why it must be ignored.
    pub fn accept(
        &self,
        record: &RemoteSessionRecord,
        segments: &[Segment],
        now: DateTime<Utc>,
    ) -> Result<ExternalPatch, IgnoreReason> {
        if self.retired {
            return Err(IgnoreReason::Retired);
        }
        if !self.context.targets(&record.state.plan_id, &record.state.day_id) {
            return Err(IgnoreReason::OtherDay);
        }
        if record.state.device_id == self.device_id {
            return Err(IgnoreReason::OwnWrite);
        }
        if let Some(last_write) = self.last_local_write {
            if record.last_updated_at <= last_write {
                return Err(IgnoreReason::NotNewerThanLocalWrite);
            }
        }
        if self.write_in_flight.load(Ordering::SeqCst) {
            return Err(IgnoreReason::WriteInFlight);
        }

        let index = record.state.segment_index;
        if index >= segments.len() {
            return Err(IgnoreReason::IndexOutOfRange);
        }

        Ok(ExternalPatch {
            current_index: Some(index),
            seconds_remaining: Some(record.seconds_remaining_at(now)),
            is_running: Some(record.state.status == super::RemoteStatus::Running),
            is_finished: Some(false),
            completed_indices: Some((0..index).collect::<BTreeSet<_>>()),
        })
    }

    pub async fn fetch_current(&self) -> Option<RemoteSessionRecord> {
        match tokio::time::timeout(self.write_timeout, self.store.fetch(&self.context.user_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                warn!("Failed to read remote session for {}: {err:#}", self.context.user_id);
                None
            }
            Err(_) => {
                warn!("Timed out reading remote session for {}", self.context.user_id);
                None
            }
        }
    }
}
