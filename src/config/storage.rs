//! Settings location and loading
//!
//! Settings live in `settings.json` under `~/.omnilink` (`%APPDATA%\Omnilink`
//! on Windows). The core only reads them; whoever edits the file owns writing.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, warn};

use super::settings::{CoreSettings, SETTINGS_VERSION};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    if let Some(app_data) = dirs::config_dir() {
        return Ok(app_data.join("Omnilink"));
    }

    dirs::home_dir()
        .map(|home| home.join(".omnilink"))
        .ok_or(StorageError::NoConfigDir)
}

/// Directory holding the repository database. Defaults to the config dir.
pub fn data_dir(settings: &CoreSettings) -> Result<PathBuf, StorageError> {
    match &settings.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => config_dir(),
    }
}

pub struct SettingsStorage {
    path: PathBuf,
}

impl SettingsStorage {
    /// `settings.json` in the config dir
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(config_dir()?.join(SETTINGS_FILE)))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file: defaults. Unparseable file: moved aside, then defaults.
    /// A file from a newer release is an error so it is never clobbered.
    pub async fn load(&self) -> Result<CoreSettings, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CoreSettings::default())
            }
            Err(e) => return Err(e.into()),
        };

        let settings = match serde_json::from_str::<CoreSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Unreadable settings at {:?}: {}", self.path, e);
                self.set_aside().await;
                return Ok(CoreSettings::default());
            }
        };

        if settings.version > SETTINGS_VERSION {
            return Err(StorageError::VersionTooNew {
                found: settings.version,
                supported: SETTINGS_VERSION,
            });
        }
        Ok(settings)
    }

    /// Rename the broken file to `settings.json.broken.<timestamp>`
    async fn set_aside(&self) {
        let aside = self.path.with_extension(format!(
            "json.broken.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        match fs::rename(&self.path, &aside).await {
            Ok(()) => warn!("Moved unreadable settings to {:?}, using defaults", aside),
            Err(e) => error!("Could not move unreadable settings aside: {}", e),
        }
    }
}
