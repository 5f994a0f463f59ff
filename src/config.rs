//! Paths and persisted settings
//!
//! **Why**: The binary needs one place that decides where `seqio.json` and
//! `seqio.log` live and what the cache, preload and codec defaults are.
//!
//! **Used by**: `main.rs` (logging, settings), CLI commands (cache budget,
//! worker count, I/O options)
//!
//! Directory priority:
//! 1. CLI `--config-dir`
//! 2. `SEQIO_CONFIG_DIR` environment variable
//! 3. Current directory, if it already holds `seqio.json` or `seqio.log`
//! 4. Platform directory from `dirs-next`
//!
//! Platform paths:
//! - Linux: ~/.config/seqio (config), ~/.local/share/seqio (data)
//! - macOS: ~/Library/Application Support/seqio
//! - Windows: %APPDATA%\seqio

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::CacheManager;
use crate::entities::sequence::DEFAULT_MAX_FRAMES;
use crate::io::IoOptions;

pub const APP_NAME: &str = "seqio";
pub const SETTINGS_FILE: &str = "seqio.json";
pub const LOG_FILE: &str = "seqio.log";
pub const CONFIG_DIR_ENV: &str = "SEQIO_CONFIG_DIR";

/// Override for the default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI arg, then `SEQIO_CONFIG_DIR`, then none (defaults).
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }

    /// Path of a configuration file (settings).
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    /// Path of a data file (logs).
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_file(SETTINGS_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_file(LOG_FILE)
    }

    /// Create the config and data directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).with_context(|| {
                format!("Failed to create config directory: {}", config_dir.display())
            })?;
        }
        if data_dir != config_dir && !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
        }
        Ok(())
    }

    fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir())
    }

    fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir())
    }

    fn resolve(&self, platform: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(current_dir) = std::env::current_dir() {
            if has_local_files(&current_dir) {
                return current_dir;
            }
        }
        platform
            .map(|dir| dir.join(APP_NAME))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

/// Frame cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Explicit budget in MB; 0 means use `memory_percent` of available RAM
    pub budget_mb: u64,
    /// 5-95% of available memory (default 75%)
    pub memory_percent: f32,
    /// Memory left to the system (default 2.0 GB)
    pub reserve_gb: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_mb: 0,
            memory_percent: 75.0,
            reserve_gb: 2.0,
        }
    }
}

impl CacheSettings {
    /// Cache manager sized from these settings.
    pub fn manager(&self) -> CacheManager {
        if self.budget_mb > 0 {
            CacheManager::with_limit((self.budget_mb as usize).saturating_mul(1024 * 1024))
        } else {
            let fraction = (self.memory_percent.clamp(5.0, 95.0) / 100.0) as f64;
            CacheManager::new(fraction, self.reserve_gb.max(0.0) as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadSettings {
    pub enabled: bool,
    /// Frames ahead of the playhead; 0 = whole sequence
    pub window: usize,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self { enabled: true, window: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Frame count guard for ranges and discovery
    pub max_frames: usize,
    /// Expand a numbered file into its sequence
    pub auto_detect: bool,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            auto_detect: true,
        }
    }
}

/// Everything persisted in `seqio.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub preload: PreloadSettings,
    /// Decode threads; 0 = auto (3/4 of the CPUs)
    pub workers: usize,
    pub io: IoOptions,
    pub sequence: SequenceSettings,
}

impl Settings {
    /// Read settings; a missing file gives defaults, malformed JSON is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("Malformed settings: {}", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Push process-wide values (frame limit) into the library.
    pub fn apply(&self) {
        crate::entities::sequence::set_max_frames(self.sequence.max_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::dpx::DpxBits;

    #[test]
    fn test_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config.settings_file(), PathBuf::from("/custom/seqio.json"));
        assert_eq!(config.log_file(), PathBuf::from("/custom/seqio.log"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));
    }

    /// Test: missing file gives defaults; partial JSON fills the rest
    #[test]
    fn test_settings_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());

        std::fs::write(&path, r#"{ "cache": { "budget_mb": 512 }, "workers": 3 }"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.cache.budget_mb, 512);
        assert!(settings.cache.enabled);
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.sequence.max_frames, DEFAULT_MAX_FRAMES);
        assert_eq!(settings.cache.manager().limit(), 512 * 1024 * 1024);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    /// Test: codec options survive a save/load cycle
    #[test]
    fn test_settings_save() {
        let dir = tempfile::tempdir().unwrap();
        let config = PathConfig {
            config_dir: Some(dir.path().join("nested")),
        };
        config.ensure_dirs().unwrap();

        let mut settings = Settings::default();
        settings.io.dpx.bits = DpxBits::Sixteen;
        settings.preload.window = 48;
        settings.save(&config.settings_file()).unwrap();

        assert_eq!(Settings::load(&config.settings_file()).unwrap(), settings);
    }
}
