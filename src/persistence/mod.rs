//! Device-local snapshot of the running session, used to offer a resume after
//! a reload.

pub mod resume;

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::warn;

use crate::models::PersistedSnapshot;

pub use resume::{evaluate_resume, effective_seconds_remaining, ResumeChoice, ResumeDecision, ResumeOffer};

pub trait SnapshotStore: Send + Sync {
    /// Returns `None` for both a missing and an unreadable snapshot.
    fn load(&self, user_id: &str) -> Option<PersistedSnapshot>;

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()>;

    fn clear(&self, user_id: &str) -> Result<()>;
}

/// One JSON file per user inside `dir`.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("focus-session-{safe}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, user_id: &str) -> Option<PersistedSnapshot> {
        let path = self.path_for(user_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Failed to read session snapshot {}: {err}", path.display());
                return None;
            }
        };

        match serde_json::from_str::<PersistedSnapshot>(&contents) {
            Ok(snapshot) if snapshot.user_id == user_id => Some(snapshot),
            Ok(_) => {
                warn!("Session snapshot {} belongs to another user", path.display());
                None
            }
            Err(err) => {
                warn!("Ignoring unreadable session snapshot {}: {err}", path.display());
                None
            }
        }
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.user_id);
        let serialized = serde_json::to_vec_pretty(snapshot)?;
        write_atomically(&path, &serialized)
            .with_context(|| format!("Failed to write session snapshot to {}", path.display()))
    }

    fn clear(&self, user_id: &str) -> Result<()> {
        let path = self.path_for(user_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to remove session snapshot {}", path.display())),
        }
    }
}

/// Temp file in the same directory, fsync, then rename over the target.
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
