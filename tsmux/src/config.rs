//! Application configuration.
//!
//! Settings come from a TOML file (every field optional) and the
//! environment. `FFMPEG_PATH`, from the process environment or a `.env`
//! file, overrides the configured tool path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::monitor::{
    DEFAULT_DISK_CEILING_MB_S, DEFAULT_HIGH_WATER_PCT, DEFAULT_LOW_WATER_PCT, Watermarks,
};
use crate::pipeline::{DEFAULT_EVENT_CAPACITY, PoolConfig, RunOptions};
use crate::{Error, Result};

/// Environment variable overriding [`AppConfig::ffmpeg_path`].
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

const APP_DIR: &str = "tsmux";
const CONFIG_FILE: &str = "config.toml";

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Capacity monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub high_water_pct: f64,
    pub low_water_pct: f64,
    /// Disk throughput (read plus write) that counts as fully busy.
    pub disk_throughput_mb_s: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            high_water_pct: DEFAULT_HIGH_WATER_PCT,
            low_water_pct: DEFAULT_LOW_WATER_PCT,
            disk_throughput_mb_s: DEFAULT_DISK_CEILING_MB_S,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks::new(self.high_water_pct, self.low_water_pct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ffmpeg_path: PathBuf,
    pub max_workers: usize,
    pub use_acceleration: bool,
    /// Replace existing outputs instead of failing the job.
    pub overwrite_existing: bool,
    pub log_dir: PathBuf,
    pub monitor: MonitorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            max_workers: 1,
            use_acceleration: true,
            overwrite_existing: false,
            log_dir: default_log_dir(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config_dir>/tsmux/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid configuration: {e}")))
    }

    /// Read a config file. A missing file yields defaults unless `required`.
    pub fn load_file(path: &Path, required: bool) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Load `.env`, the config file (explicit or default location) and the
    /// environment override, then validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = match explicit {
            Some(path) => Self::load_file(path, true)?,
            None => match Self::default_path() {
                Some(path) => Self::load_file(&path, false)?,
                None => Self::default(),
            },
        };

        let config = config.with_ffmpeg_override(std::env::var_os(FFMPEG_PATH_ENV));
        config.validate()?;
        Ok(config)
    }

    /// Apply a tool path override; empty values are ignored.
    pub fn with_ffmpeg_override(mut self, value: Option<OsString>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.ffmpeg_path = PathBuf::from(value);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.ffmpeg_path.as_os_str().is_empty() {
            return Err(Error::config("ffmpeg_path must not be empty"));
        }
        if self.monitor.interval_ms == 0 {
            return Err(Error::config("monitor.interval_ms must be positive"));
        }
        if self.monitor.disk_throughput_mb_s == 0 {
            return Err(Error::config("monitor.disk_throughput_mb_s must be positive"));
        }
        let (low, high) = (self.monitor.low_water_pct, self.monitor.high_water_pct);
        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) {
            return Err(Error::config("monitor watermarks must be within 0..=100"));
        }
        if low >= high {
            return Err(Error::config(format!(
                "monitor.low_water_pct ({low}) must be below monitor.high_water_pct ({high})"
            )));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            monitor_interval: self.monitor.interval(),
            monitor_enabled: self.monitor.enabled,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(self.max_workers).with_acceleration(self.use_acceleration)
    }
}
