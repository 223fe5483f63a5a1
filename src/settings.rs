use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use uuid::Uuid;

use crate::persistence::write_atomically;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPreferences {
    pub sound_enabled: bool,
    pub notifications_enabled: bool,
    /// Start the next segment automatically when one runs out.
    pub auto_start_next: bool,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            notifications_enabled: true,
            auto_start_next: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    session: SessionPreferences,
    device_id: Option<String>,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads the settings file, creating a device id on first use.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Settings at {} unreadable, using defaults: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        let needs_device_id = data.device_id.is_none();
        if needs_device_id {
            let device_id = Uuid::new_v4().to_string();
            info!("Registered new device id {device_id}");
            data.device_id = Some(device_id);
        }

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        if needs_device_id {
            store.persist(&store.read())?;
        }
        Ok(store)
    }

    pub fn preferences(&self) -> SessionPreferences {
        self.read().session.clone()
    }

    pub fn update_preferences(&self, preferences: SessionPreferences) -> Result<()> {
        let mut guard = self.write();
        guard.session = preferences;
        self.persist(&guard)
    }

    pub fn device_id(&self) -> String {
        self.read().device_id.clone().unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        write_atomically(&self.path, serialized.as_bytes())
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
