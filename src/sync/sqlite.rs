use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::{sync::broadcast, time::MissedTickBehavior};

use crate::{clock::Clock, db::Database};

use super::{RemoteChange, RemoteSessionRecord, RemoteSessionState, RemoteSessionStore};

const CHANNEL_CAPACITY: usize = 64;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<RemoteChange>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Session record kept in a SQLite file that several processes open.
/// Subscriptions poll the row and push whatever changed.
#[derive(Clone)]
pub struct SqliteRemoteStore {
    db: Database,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    channels: Channels,
}

impl SqliteRemoteStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self::with_poll_interval(db, clock, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn with_poll_interval(db: Database, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            db,
            clock,
            poll_interval,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// What the poller last saw for a user, to tell real changes from re-reads.
fn fingerprint(record: &RemoteSessionRecord) -> (DateTime<Utc>, String) {
    (record.last_updated_at, record.state.device_id.clone())
}

async fn poll_remote_session(
    db: Database,
    user_id: String,
    sender: broadcast::Sender<RemoteChange>,
    channels: Channels,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_seen = match db.get_remote_session(&user_id).await {
        Ok(record) => record.as_ref().map(fingerprint),
        Err(err) => {
            warn!("Initial remote session read failed for {user_id}: {err:#}");
            None
        }
    };

    loop {
        ticker.tick().await;

        if sender.receiver_count() == 0 {
            let mut channels = lock(&channels);
            // A new subscriber may have attached between the check and the lock.
            if sender.receiver_count() == 0 {
                channels.remove(&user_id);
                debug!("Remote session poller for {user_id} stopping (no subscribers)");
                break;
            }
        }

        let current = match db.get_remote_session(&user_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!("Remote session poll failed for {user_id}: {err:#}");
                continue;
            }
        };

        let change = match (&current, &last_seen) {
            (Some(record), Some(seen)) if fingerprint(record) == *seen => None,
            (Some(record), _) => Some(RemoteChange::Upserted(record.clone())),
            (None, Some(_)) => Some(RemoteChange::Deleted {
                user_id: user_id.clone(),
            }),
            (None, None) => None,
        };

        last_seen = current.as_ref().map(fingerprint);
        if let Some(change) = change {
            let _ = sender.send(change);
        }
    }
}

#[async_trait]
impl RemoteSessionStore for SqliteRemoteStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>> {
        self.db.get_remote_session(user_id).await
    }

    async fn upsert(&self, user_id: &str, state: RemoteSessionState) -> Result<RemoteSessionRecord> {
        self.db
            .upsert_remote_session(user_id, &state, self.clock.now())
            .await
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.db.delete_remote_session(user_id).await
    }

    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemoteChange> {
        let mut channels = lock(&self.channels);
        if let Some(sender) = channels.get(user_id) {
            return sender.subscribe();
        }

        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(user_id.to_string(), sender.clone());
        info!("Watching remote session record for {user_id}");
        tokio::spawn(poll_remote_session(
            self.db.clone(),
            user_id.to_string(),
            sender,
            self.channels.clone(),
            self.poll_interval,
        ));
        receiver
    }
}
