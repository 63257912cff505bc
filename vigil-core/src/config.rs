use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub recording: RecordingConfig,
    pub supervisor: SupervisorConfig,
    pub ingest: IngestConfig,
    pub playback: PlaybackConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Where moment clips land when a session has no explicit save location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub moments_dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            moments_dir: PathBuf::from("./data/moments"),
        }
    }
}

/// Restart policy for a stream session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Consecutive failed attempts tolerated before giving up.
    pub hearts: u32,
    /// Fixed wait between failed attempts, in seconds.
    pub backoff_seconds: u64,
    /// An attempt that runs this long uninterrupted restores the full budget.
    pub stability_window_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            hearts: 5,
            backoff_seconds: 5,
            stability_window_seconds: 30,
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }

    #[must_use]
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Per-read timeout for the next source packet, in seconds.
    pub read_timeout_seconds: u64,
    /// Emission cap for live sources, frames per second.
    pub live_max_fps: u32,
    /// Output frames are scaled so the longer side fits this.
    pub max_dimension: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            read_timeout_seconds: 10,
            live_max_fps: 30,
            max_dimension: 720,
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

/// Consumer playback buffer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Backlog byte budget; oldest chunks are dropped past this.
    pub max_queued_bytes: usize,
    /// Live-edge threshold / hysteresis before first successful playback.
    pub initial_live_edge_threshold_secs: f64,
    pub initial_seek_hysteresis_secs: f64,
    /// Relaxed values once playback has started.
    pub relaxed_live_edge_threshold_secs: f64,
    pub relaxed_seek_hysteresis_secs: f64,
    /// Buffered media older than this behind the playhead is trimmed.
    pub retention_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_queued_bytes: 3 * 1024 * 1024,
            initial_live_edge_threshold_secs: 1.0,
            initial_seek_hysteresis_secs: 0.2,
            relaxed_live_edge_threshold_secs: 6.0,
            relaxed_seek_hysteresis_secs: 4.0,
            retention_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Relay target; webhook delivery is disabled when unset.
    pub url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: 10,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (VIGIL_LOGGING_LEVEL, etc.)
        builder = builder.add_source(
            Environment::with_prefix("VIGIL")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
