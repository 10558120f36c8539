//! Persistent CLI settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use callmatch_core::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub engine: EngineConfig,
    /// Samples per chunk when streaming a WAV file into a session.
    pub chunk_size: usize,
    /// Include the warping path length in score reports.
    pub report_path: bool,
    /// Directory score reports are written to, if any.
    pub report_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            chunk_size: 1024,
            report_path: false,
            report_dir: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.engine.normalize();
        self.chunk_size = self.chunk_size.clamp(64, 65_536);
        self.report_dir = self
            .report_dir
            .take()
            .filter(|d| !d.as_os_str().is_empty());
    }
}

/// Environment overrides for the master-call and feature directories.
pub fn apply_env_overrides(settings: &mut AppSettings) {
    if let Some(dir) = std::env::var_os("CALLMATCH_MASTER_CALLS_DIR").filter(|v| !v.is_empty()) {
        settings.engine.reference.master_calls_dir = PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("CALLMATCH_FEATURES_DIR").filter(|v| !v.is_empty()) {
        settings.engine.reference.features_dir = PathBuf::from(dir);
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("callmatch")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("callmatch")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
