use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

const APP_DIR: &str = "taskboard";
const DATABASE_FILE: &str = "taskboard.sqlite";
const MIN_CHANGE_BUFFER: usize = 16;
const MAX_CHANGE_BUFFER: usize = 4_096;
const DEFAULT_CHANGE_BUFFER: usize = 256;
const MIN_NOTICE_CAPACITY: usize = 1;
const MAX_NOTICE_CAPACITY: usize = 50;
const DEFAULT_NOTICE_CAPACITY: usize = 5;
const MIN_NOTIFICATION_DURATION_MS: u64 = 500;
const MAX_NOTIFICATION_DURATION_MS: u64 = 60_000;
const DEFAULT_NOTIFICATION_DURATION_MS: u64 = 4_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub change_buffer: usize,
    pub notice_capacity: usize,
    pub notification_display_duration_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            change_buffer: DEFAULT_CHANGE_BUFFER,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            notification_display_duration_ms: DEFAULT_NOTIFICATION_DURATION_MS,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push(APP_DIR);
        path.push("settings.toml");
        Some(path)
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("unable to determine config path"))?;
        self.save_to_path(&path)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Database location: the configured override, else the platform data dir.
    pub fn resolved_database_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let mut path =
            dirs::data_local_dir().ok_or_else(|| anyhow!("unable to determine data directory"))?;
        path.push(APP_DIR);
        path.push(DATABASE_FILE);
        Ok(path)
    }

    pub fn notification_display_duration(&self) -> Duration {
        Duration::from_millis(self.notification_display_duration_ms)
    }

    fn validate(&mut self) {
        self.change_buffer = self
            .change_buffer
            .clamp(MIN_CHANGE_BUFFER, MAX_CHANGE_BUFFER);
        self.notice_capacity = self
            .notice_capacity
            .clamp(MIN_NOTICE_CAPACITY, MAX_NOTICE_CAPACITY);
        self.notification_display_duration_ms = self
            .notification_display_duration_ms
            .clamp(MIN_NOTIFICATION_DURATION_MS, MAX_NOTIFICATION_DURATION_MS);

        if self
            .database_path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            warn!("empty database_path in settings config; using the default location");
            self.database_path = None;
        }
    }
}
