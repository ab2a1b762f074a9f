//! Configuration types for the Mathboard client.
//!
//! Configuration lives in `mathboard.json` (camelCase keys). Every field has a
//! default, unknown fields are ignored, and a missing file yields the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MathboardError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "mathboard.json";

/// Default WebSocket URL of the remote step service.
fn default_server_url() -> String {
    "ws://127.0.0.1:8000/ws".to_string()
}

/// Default port for the local API and view socket.
const fn default_api_port() -> u16 {
    3000
}

/// Default per-subscriber buffer for view events.
const fn default_view_event_capacity() -> usize {
    100
}

/// Default buffer for user commands waiting on the controller.
const fn default_command_buffer() -> usize {
    32
}

/// Default bitrate used to estimate clip duration (narration mp3).
const fn default_bitrate_kbps() -> u32 {
    64
}

/// Default upper bound on a single clip's playback time.
const fn default_max_clip_seconds() -> u32 {
    120
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the Mathboard client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// WebSocket URL of the remote step service.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Port for the local HTTP API and view socket.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Buffer size for each view-event subscriber.
    #[serde(default = "default_view_event_capacity")]
    pub view_event_capacity: usize,

    /// Buffer size of the controller's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    /// Narration playback settings.
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_port: default_api_port(),
            view_event_capacity: default_view_event_capacity(),
            command_buffer: default_command_buffer(),
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir()
            .map_err(|e| MathboardError::config_read("<current directory>", e))?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `mathboard.json` from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `MathboardError::ConfigReadError` if the file cannot be read,
    /// `MathboardError::ConfigParseError` if it contains invalid JSON, and `MathboardError::ConfigValidationError` if
    /// the values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => return Err(MathboardError::config_read(path, e)),
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| MathboardError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `serverUrl` must be a `ws://` or `wss://` URL
    /// - `viewEventCapacity` and `commandBuffer` must be greater than 0
    /// - `audio.bitrateKbps` and `audio.maxClipSeconds` must be greater than 0
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(MathboardError::config_validation(
                format!("serverUrl must be a WebSocket URL, got '{}'", self.server_url),
                "Set serverUrl to a ws:// or wss:// address in your mathboard.json",
            ));
        }

        if self.view_event_capacity == 0 {
            return Err(MathboardError::config_validation(
                "viewEventCapacity must be greater than 0",
                "Set viewEventCapacity to at least 1 in your mathboard.json",
            ));
        }

        if self.command_buffer == 0 {
            return Err(MathboardError::config_validation(
                "commandBuffer must be greater than 0",
                "Set commandBuffer to at least 1 in your mathboard.json",
            ));
        }

        if self.audio.bitrate_kbps == 0 {
            return Err(MathboardError::config_validation(
                "audio.bitrateKbps must be greater than 0",
                "Set audio.bitrateKbps to the narration bitrate (64 for the default voice)",
            ));
        }

        if self.audio.max_clip_seconds == 0 {
            return Err(MathboardError::config_validation(
                "audio.maxClipSeconds must be greater than 0",
                "Set audio.maxClipSeconds to at least 1 second in your mathboard.json",
            ));
        }

        Ok(())
    }
}

/// Narration playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Whether narration is played at all. When false every clip is skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bitrate used to estimate how long a clip plays.
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Upper bound on a single clip's playback time in seconds.
    #[serde(default = "default_max_clip_seconds")]
    pub max_clip_seconds: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bitrate_kbps: default_bitrate_kbps(),
            max_clip_seconds: default_max_clip_seconds(),
        }
    }
}
