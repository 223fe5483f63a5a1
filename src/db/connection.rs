use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// Another process may hold the write lock while it mirrors a session.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the worker. Dropping the sender closes the queue; the worker drains
/// what is left and exits, and is joined here.
struct Worker {
    queue: Mutex<Option<mpsc::Sender<DbTask>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn sender(&self) -> Result<mpsc::Sender<DbTask>> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| anyhow!("database queue lock poisoned"))?;
        queue
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow!("database is shut down"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let queue = match self.queue.get_mut() {
            Ok(queue) => queue.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(queue);

        let handle = match self.handle.get_mut() {
            Ok(handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Database worker panicked before shutdown");
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Failed to enable WAL mode: {err}");
    }
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set SQLite busy timeout")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

/// Handle to the SQLite file. Every statement runs on one dedicated thread,
/// so clones can be shared freely between async tasks and processes can
/// share the file through WAL.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }

        let (queue_tx, queue_rx) = mpsc::channel::<DbTask>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let worker_path = path.clone();

        let handle = thread::Builder::new()
            .name("focusramp-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&worker_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let mut handled = 0u64;
                for task in queue_rx {
                    task(&mut conn);
                    handled += 1;
                }
                debug!("Database worker handled {handled} task(s) before closing");
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before it was ready")??;
        info!("Database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                queue: Mutex::new(Some(queue_tx)),
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: DbTask = Box::new(move |conn| {
            // The caller may have been cancelled; nothing to report then.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .sender()?
            .send(job)
            .map_err(|_| anyhow!("database worker is no longer running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker stopped before replying"))?
    }
}
