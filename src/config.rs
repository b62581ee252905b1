//! Client configuration with persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mpd::{MpdError, VersionThresholds};

const CONFIG_DIR: &str = "mpd-engine";
const CONFIG_FILE: &str = "config.json";

/// Connection and synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
  /// Server host name or address.
  #[serde(default = "default_host")]
  pub host: String,

  #[serde(default = "default_port")]
  pub port: u16,

  /// Sent with `password` right after the greeting.
  #[serde(default)]
  pub password: Option<String>,

  /// Local socket path; takes precedence over host/port.
  #[serde(default)]
  pub socket_path: Option<String>,

  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,

  /// Upper bound for a single socket read.
  #[serde(default = "default_read_timeout_ms")]
  pub read_timeout_ms: u64,

  /// Reconnect attempts after a lost connection (0 = never reconnect).
  #[serde(default = "default_reconnect_retries")]
  pub reconnect_retries: u32,

  /// Workers for independent read-only verbs (0 = everything serial).
  #[serde(default = "default_pool_size")]
  pub pool_size: usize,

  /// Interpolation tick of the state monitor.
  #[serde(default = "default_tick_interval_ms")]
  pub tick_interval_ms: u64,

  /// Ticks without a server read before a resync is forced.
  #[serde(default = "default_idle_budget")]
  pub idle_budget: u32,

  /// Delay before a failed resync is retried.
  #[serde(default = "default_resync_interval_ms")]
  pub resync_interval_ms: u64,

  /// Run the `idle` push listener on a second connection.
  #[serde(default = "default_idle_enabled")]
  pub idle_enabled: bool,

  #[serde(default)]
  pub thresholds: VersionThresholds,
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_port() -> u16 {
  6600
}

fn default_connect_timeout_ms() -> u64 {
  5_000
}

fn default_read_timeout_ms() -> u64 {
  15_000
}

fn default_reconnect_retries() -> u32 {
  10
}

fn default_pool_size() -> usize {
  2
}

fn default_tick_interval_ms() -> u64 {
  1_000
}

fn default_idle_budget() -> u32 {
  30
}

fn default_resync_interval_ms() -> u64 {
  2_000
}

fn default_idle_enabled() -> bool {
  true
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      password: None,
      socket_path: None,
      connect_timeout_ms: default_connect_timeout_ms(),
      read_timeout_ms: default_read_timeout_ms(),
      reconnect_retries: default_reconnect_retries(),
      pool_size: default_pool_size(),
      tick_interval_ms: default_tick_interval_ms(),
      idle_budget: default_idle_budget(),
      resync_interval_ms: default_resync_interval_ms(),
      idle_enabled: default_idle_enabled(),
      thresholds: VersionThresholds::default(),
    }
  }
}

impl ClientConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.socket_path.is_none() && self.host.trim().is_empty() {
      return Err("Host cannot be empty".to_string());
    }
    if self.socket_path.is_none() && self.port == 0 {
      return Err("Port cannot be 0".to_string());
    }
    if let Some(path) = &self.socket_path {
      if path.trim().is_empty() {
        return Err("Socket path cannot be empty".to_string());
      }
    }
    if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
      return Err("Timeouts must be greater than 0".to_string());
    }
    if self.pool_size > 16 {
      return Err("Pool size must be at most 16".to_string());
    }
    if self.tick_interval_ms < 10 || self.tick_interval_ms > 60_000 {
      return Err("Tick interval must be between 10 ms and 60 seconds".to_string());
    }
    if self.idle_budget < 1 {
      return Err("Idle budget must be at least 1 tick".to_string());
    }
    if self.resync_interval_ms == 0 {
      return Err("Resync interval must be greater than 0".to_string());
    }
    Ok(())
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn read_timeout(&self) -> Duration {
    Duration::from_millis(self.read_timeout_ms)
  }

  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.tick_interval_ms)
  }

  pub fn resync_interval(&self) -> Duration {
    Duration::from_millis(self.resync_interval_ms)
  }

  /// `host:port` or the socket path, for log lines.
  pub fn endpoint(&self) -> String {
    match &self.socket_path {
      Some(path) => path.clone(),
      None => format!("{}:{}", self.host, self.port),
    }
  }

  /// Default location of the configuration file.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
  }

  /// Load and validate a configuration file.
  pub fn load(path: &Path) -> Result<Self, MpdError> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| MpdError::Config(format!("{}: {}", path.display(), e)))?;
    let config: Self = serde_json::from_str(&text)
      .map_err(|e| MpdError::Config(format!("{}: {}", path.display(), e)))?;
    config.validate().map_err(MpdError::Config)?;
    Ok(config)
  }

  /// Load from the default location, falling back to defaults when absent.
  pub fn load_default() -> Result<Self, MpdError> {
    match Self::default_path() {
      Some(path) if path.exists() => Self::load(&path),
      _ => {
        log::info!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  /// Write as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), MpdError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| MpdError::Config(format!("{}: {}", parent.display(), e)))?;
    }
    let text = serde_json::to_string_pretty(self)
      .map_err(|e| MpdError::Config(e.to_string()))?;
    std::fs::write(path, text).map_err(|e| MpdError::Config(format!("{}: {}", path.display(), e)))?;
    log::info!("Configuration saved to {}", path.display());
    Ok(())
  }
}
