//! In-memory stand-ins for the store traits, with failure switches.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::NewWorkLog,
    ledger::{CompletionSink, WorkLogStore},
    models::{DayContext, PersistedSnapshot},
    notify::{Notifier, TransitionEvent},
    persistence::SnapshotStore,
};

#[derive(Default)]
struct WorkLogState {
    entries: Vec<NewWorkLog>,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct MemoryWorkLogStore {
    state: Arc<Mutex<WorkLogState>>,
}

impl MemoryWorkLogStore {
    pub fn entries(&self) -> Vec<NewWorkLog> {
        self.state.lock().unwrap().entries.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }
}

#[async_trait]
impl WorkLogStore for MemoryWorkLogStore {
    async fn logged_indices(&self, day_id: &str) -> Result<Vec<usize>> {
        let state = self.state.lock().unwrap();
        if state.failing {
            bail!("work log store unavailable");
        }
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.day_id == day_id)
            .map(|entry| entry.segment_index)
            .collect())
    }

    async fn append(&self, entry: &NewWorkLog) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            bail!("work log store unavailable");
        }
        if entry.actual_seconds < 0 {
            bail!("actual_seconds must not be negative");
        }
        let duplicate = state
            .entries
            .iter()
            .any(|existing| existing.day_id == entry.day_id && existing.segment_index == entry.segment_index);
        if !duplicate {
            state.entries.push(entry.clone());
        }
        Ok(!duplicate)
    }
}

#[derive(Default)]
struct CompletionState {
    days: Vec<String>,
    plans: Vec<String>,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct RecordingCompletionSink {
    state: Arc<Mutex<CompletionState>>,
}

impl RecordingCompletionSink {
    pub fn days(&self) -> Vec<String> {
        self.state.lock().unwrap().days.clone()
    }

    pub fn plans(&self) -> Vec<String> {
        self.state.lock().unwrap().plans.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }
}

#[async_trait]
impl CompletionSink for RecordingCompletionSink {
    async fn day_completed(&self, context: &DayContext, _at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            bail!("completion service unavailable");
        }
        state.days.push(context.day_id.clone());
        Ok(())
    }

    async fn plan_completed(&self, context: &DayContext, _at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            bail!("completion service unavailable");
        }
        state.plans.push(context.plan_id.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<String, PersistedSnapshot>>>,
}

impl MemorySnapshotStore {
    pub fn get(&self, user_id: &str) -> Option<PersistedSnapshot> {
        self.snapshots.lock().unwrap().get(user_id).cloned()
    }

    pub fn put(&self, snapshot: PersistedSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.user_id.clone(), snapshot);
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, user_id: &str) -> Option<PersistedSnapshot> {
        self.get(user_id)
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        self.put(snapshot.clone());
        Ok(())
    }

    fn clear(&self, user_id: &str) -> Result<()> {
        self.snapshots.lock().unwrap().remove(user_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<TransitionEvent>>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn segment_transition(&self, event: &TransitionEvent) {
        self.events.lock().unwrap().push(*event);
    }
}
