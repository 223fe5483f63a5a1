//! Cross-device mirroring of the active session through one shared record
//! per user.

pub mod memory;
pub mod mirror;
pub mod record;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::MemoryRemoteStore;
pub use mirror::{IgnoreReason, RemoteSessionMirror};
pub use record::{RemoteChange, RemoteSessionRecord, RemoteSessionState, RemoteStatus};
pub use sqlite::SqliteRemoteStore;

/// Shared store holding at most one session record per user. Writes replace
/// the whole document; the store stamps `last_updated_at`.
#[async_trait]
pub trait RemoteSessionStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>>;

    async fn upsert(&self, user_id: &str, state: RemoteSessionState) -> Result<RemoteSessionRecord>;

    async fn delete(&self, user_id: &str) -> Result<()>;

    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<RemoteChange>;
}
