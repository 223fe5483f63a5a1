use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::clock::Clock;

use super::{RemoteChange, RemoteSessionRecord, RemoteSessionState, RemoteSessionStore};

const CHANNEL_CAPACITY: usize = 64;

struct MemoryInner {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, RemoteSessionRecord>>,
    channels: Mutex<HashMap<String, broadcast::Sender<RemoteChange>>>,
    offline: AtomicBool,
}

/// In-process stand-in for the shared session store. Every clone talks to the
/// same records, so several orchestrators in one process behave like separate
/// devices.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<MemoryInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryRemoteStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                clock,
                records: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// While offline every call fails, like an unreachable backend.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn record(&self, user_id: &str) -> Option<RemoteSessionRecord> {
        lock(&self.inner.records).get(user_id).cloned()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            bail!("remote session store unreachable");
        }
        Ok(())
    }

    fn publish(&self, user_id: &str, change: RemoteChange) {
        if let Some(sender) = lock(&self.inner.channels).get(user_id) {
            // No live subscribers is fine.
            let _ = sender.send(change);
        }
    }
}

#[async_trait]
impl RemoteSessionStore for MemoryRemoteStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>> {
        self.ensure_online()?;
        Ok(self.record(user_id))
    }

    async fn upsert(&self, user_id: &str, state: RemoteSessionState) -> Result<RemoteSessionRecord> {
        self.ensure_online()?;
        let record = RemoteSessionRecord::stamped(state, self.inner.clock.now());
        lock(&self.inner.records).insert(user_id.to_string(), record.clone());
        self.publish(user_id, RemoteChange::Upserted(record.clone()));
        Ok(record)
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.ensure_online()?;
        let removed = lock(&self.inner.records).remove(user_id);
        if removed.is_some() {
            self.publish(
                user_id,
                RemoteChange::Deleted {
                    user_id: user_id.to_string(),
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemoteChange> {
        lock(&self.inner.channels)
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
