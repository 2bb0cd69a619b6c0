use crate::global;
use crate::protocol::ProtocolSettings;
use crate::recording::CaptureSettings;
use crate::session::SessionOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub recording: RecordingConfig,
    pub protocol: ProtocolConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub room: String,
    /// Conferencing domain recorded in the session metadata.
    pub domain: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// How often capture emits an encoded chunk.
    pub timeslice_ms: u64,
    /// Preferred codecs in order; the first supported one wins.
    pub audio_codecs: Vec<String>,
    pub video_codecs: Vec<String>,
    pub capture_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub broadcast_log_capacity: usize,
    pub resync_timeout_ms: u64,
    pub dedup_ttl_secs: u64,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Defaults to the recordings directory under the data dir.
    pub output_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: "hotpod".to_string(),
            domain: None,
            display_name: "Host".to_string(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            timeslice_ms: capture.timeslice.as_millis() as u64,
            audio_codecs: capture.audio_codecs,
            video_codecs: capture.video_codecs,
            capture_video: capture.capture_video,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let protocol = ProtocolSettings::default();
        Self {
            broadcast_log_capacity: protocol.log_capacity,
            resync_timeout_ms: protocol.resync_timeout.as_millis() as u64,
            dedup_ttl_secs: protocol.dedup_ttl.as_secs(),
            tick_interval_ms: 250,
        }
    }
}

impl RecordingConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            timeslice: Duration::from_millis(self.timeslice_ms.max(1)),
            audio_codecs: self.audio_codecs.clone(),
            video_codecs: self.video_codecs.clone(),
            capture_video: self.capture_video,
        }
    }
}

impl ProtocolConfig {
    pub fn protocol_settings(&self) -> ProtocolSettings {
        ProtocolSettings {
            log_capacity: self.broadcast_log_capacity.max(1),
            resync_timeout: Duration::from_millis(self.resync_timeout_ms),
            dedup_ttl: Duration::from_secs(self.dedup_ttl_secs),
        }
    }
}

impl Config {
    /// Load from the default location, creating it with defaults if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        match &self.export.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::recordings_dir(),
        }
    }

    /// Session options for a peer in `room`.
    pub fn session_options(&self, room: &str) -> SessionOptions {
        SessionOptions {
            room: room.to_string(),
            domain: self.session.domain.clone(),
            capture: self.recording.capture_settings(),
            protocol: self.protocol.protocol_settings(),
            tick_interval: Duration::from_millis(self.protocol.tick_interval_ms.max(1)),
        }
    }
}
