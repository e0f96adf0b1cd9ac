//! Application configuration.
//!
//! Values are layered: built-in defaults, then
//! `<config_dir>/ultistats/config.toml`, then `ULTISTATS__*` environment
//! variables (`ULTISTATS__SYNC__SERVER_URL=http://...`).

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use chrono::Duration;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    controller::ControllerPolicy,
    session::{DeviceIdentity, RuntimeSettings, ScoringMode},
    store::SnapshotStore,
    sync::RetryPolicy,
};

/// Directory under the platform config dir.
pub const CONFIG_DIR: &str = "ultistats";
/// File name of the user configuration.
pub const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "ULTISTATS";

const DEFAULT_CONFIG: &str = r#"# Ultistats configuration.
# Every key is optional; remove a line to fall back to the built-in default.

# scoring_mode = "play_by_play"   # or "streamlined"
# clock_tick_ms = 1000
# data_root = "/path/to/snapshots"

[device]
id = "{device_id}"
name = "{device_name}"

[sync]
# server_url = "http://localhost:8000"
# game_interval_ms = 2000
# next_line_interval_ms = 1000
# request_timeout_ms = 10000
# retry_base_ms = 1000
# retry_max_ms = 60000
# conflict_window_ms = 5000

[controller]
# poll_interval_ms = 3000
# handoff_timeout_ms = 10000
# stale_timeout_ms = 30000
"#;

/// Identity this device presents to other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub id: String,
    pub name: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_device_name(),
        }
    }
}

/// Sync service location and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the sync service. Offline when unset.
    pub server_url: Option<String>,
    pub game_interval_ms: u64,
    pub next_line_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// How recent a remote line edit must be to count as concurrent.
    pub conflict_window_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            game_interval_ms: 2_000,
            next_line_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            retry_base_ms: 1_000,
            retry_max_ms: 60_000,
            conflict_window_ms: 5_000,
        }
    }
}

/// Role polling and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Controller round period; held roles are pinged every round.
    pub poll_interval_ms: u64,
    pub handoff_timeout_ms: u64,
    pub stale_timeout_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            handoff_timeout_ms: 10_000,
            stale_timeout_ms: 30_000,
        }
    }
}

/// Resolved application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory for match snapshots.
    pub data_root: PathBuf,
    pub scoring_mode: ScoringMode,
    pub clock_tick_ms: u64,
    pub device: DeviceSettings,
    pub sync: SyncSettings,
    pub controller: ControllerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: SnapshotStore::default_root(),
            scoring_mode: ScoringMode::default(),
            clock_tick_ms: 1_000,
            device: DeviceSettings::default(),
            sync: SyncSettings::default(),
            controller: ControllerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default config file and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from `path` (optional on disk) and the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let mut config: AppConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;

        if config.device.id.trim().is_empty() {
            config.device.id = Uuid::new_v4().to_string();
            warn!(device_id = %config.device.id, "no device id configured; using a temporary one");
        }
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.device.id, &self.device.name)
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            clock_tick: StdDuration::from_millis(self.clock_tick_ms.max(1)),
            game_sync_interval: StdDuration::from_millis(self.sync.game_interval_ms.max(1)),
            next_line_interval: StdDuration::from_millis(self.sync.next_line_interval_ms.max(1)),
            controller_interval: StdDuration::from_millis(self.controller.poll_interval_ms.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: millis(self.sync.retry_base_ms),
            max_delay: millis(self.sync.retry_max_ms.max(self.sync.retry_base_ms)),
        }
    }

    pub fn controller_policy(&self) -> ControllerPolicy {
        ControllerPolicy {
            handoff_timeout: millis(self.controller.handoff_timeout_ms),
            stale_timeout: millis(self.controller.stale_timeout_ms),
        }
    }

    pub fn conflict_window(&self) -> Duration {
        millis(self.sync.conflict_window_ms)
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.sync.request_timeout_ms)
    }
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "This device".to_string())
}

/// Location of the user configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Write a commented configuration template with a fresh device id if no
/// configuration exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    ensure_default_config_at(&path)?;
    Ok(path)
}

/// Same as [`ensure_default_config`] for an explicit path. Returns `true`
/// when a file was written.
pub fn ensure_default_config_at(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = DEFAULT_CONFIG
        .replace("{device_id}", &Uuid::new_v4().to_string())
        .replace("{device_name}", &default_device_name().replace('"', "'"));
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(true)
}
