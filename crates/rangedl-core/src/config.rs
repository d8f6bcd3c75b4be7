//! Settings persistence (a single JSON file)

use crate::error::RangedlError;
use rangedl_types::Settings;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "settings.json";

/// `<config_dir>/rangedl/settings.json`, or a relative path if there is no config dir
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("rangedl"))
        .unwrap_or_else(|| PathBuf::from(".rangedl"))
        .join(SETTINGS_FILE)
}

/// Load and save [`Settings`] as JSON
#[allow(async_fn_in_trait)]
pub trait SettingsStore: Sized {
    /// Read settings from `path`; a missing file yields the defaults
    async fn load(path: &Path) -> Result<Self, RangedlError>;

    /// Write settings to `path`, creating parent directories
    async fn save(&self, path: &Path) -> Result<(), RangedlError>;
}

impl SettingsStore for Settings {
    async fn load(path: &Path) -> Result<Self, RangedlError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", path);
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map_err(|e| RangedlError::Config(format!("{}: {}", path.display(), e)))
    }

    async fn save(&self, path: &Path) -> Result<(), RangedlError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| RangedlError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }
}
