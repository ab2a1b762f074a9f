//! Narration playback.
//!
//! [`AudioPlayer::play`] never fails: decode and output errors are folded into
//! a [`PlaybackOutcome`] so the controller handles every clip the same way.
//! The player does not serialise concurrent calls; the controller never
//! starts a second clip while one is in flight.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AudioConfig;

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOutcome {
    /// The clip played to the end.
    Completed,
    /// The output reported an error mid-playback.
    Failed,
    /// Nothing was played: no clip, undecodable clip, or audio disabled.
    Skipped,
}

/// Errors raised below the player; never seen by the controller.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The clip was not valid base64.
    #[error("audio decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The output device rejected the clip.
    #[error("audio output failed: {0}")]
    Output(String),
}

/// Plays one base64-encoded clip to completion.
#[async_trait]
pub trait AudioPlayer: Send + Sync + 'static {
    /// Plays `encoded` and reports how it ended.
    async fn play(&self, encoded: &str) -> PlaybackOutcome;
}

/// Consumes decoded clip bytes.
#[async_trait]
pub trait AudioOutput: Send + Sync + 'static {
    /// Plays `clip`, resolving when playback ends.
    async fn play(&self, clip: Vec<u8>) -> Result<(), AudioError>;
}

// ============================================================================
// DecodingPlayer
// ============================================================================

/// Decodes base64 narration and hands the bytes to an [`AudioOutput`].
#[derive(Debug)]
pub struct DecodingPlayer<O> {
    output: O,
    enabled: bool,
}

impl<O: AudioOutput> DecodingPlayer<O> {
    /// Creates an enabled player writing to `output`.
    #[must_use]
    pub const fn new(output: O) -> Self {
        Self {
            output,
            enabled: true,
        }
    }

    /// Creates a player that skips every clip when `enabled` is false.
    #[must_use]
    pub const fn with_enabled(output: O, enabled: bool) -> Self {
        Self { output, enabled }
    }

    fn decode(encoded: &str) -> Result<Vec<u8>, AudioError> {
        Ok(BASE64_STANDARD.decode(encoded.trim())?)
    }
}

#[async_trait]
impl<O: AudioOutput> AudioPlayer for DecodingPlayer<O> {
    async fn play(&self, encoded: &str) -> PlaybackOutcome {
        if !self.enabled {
            debug!("Audio disabled, skipping clip");
            return PlaybackOutcome::Skipped;
        }
        if encoded.trim().is_empty() {
            debug!("No audio supplied, skipping");
            return PlaybackOutcome::Skipped;
        }

        let clip = match Self::decode(encoded) {
            Ok(clip) if !clip.is_empty() => clip,
            Ok(_) => return PlaybackOutcome::Skipped,
            Err(e) => {
                warn!(error = %e, encoded_len = encoded.len(), "Could not decode audio, skipping");
                return PlaybackOutcome::Skipped;
            }
        };

        match self.output.play(clip).await {
            Ok(()) => PlaybackOutcome::Completed,
            Err(e) => {
                warn!(error = %e, "Audio playback failed");
                PlaybackOutcome::Failed
            }
        }
    }
}

// ============================================================================
// TimedOutput
// ============================================================================

/// Output that holds each clip for its estimated duration.
///
/// Duration is the clip's size at the configured bitrate, capped at
/// `max_clip`. Used where no sound device is attached, such as the terminal
/// client, so navigation gating still follows narration length.
#[derive(Debug, Clone)]
pub struct TimedOutput {
    bitrate_kbps: u32,
    max_clip: Duration,
}

impl TimedOutput {
    /// Creates an output for the given bitrate and per-clip cap.
    #[must_use]
    pub const fn new(bitrate_kbps: u32, max_clip: Duration) -> Self {
        Self {
            bitrate_kbps,
            max_clip,
        }
    }

    /// Builds the output from the audio section of the configuration.
    #[must_use]
    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.bitrate_kbps,
            Duration::from_secs(u64::from(config.max_clip_seconds)),
        )
    }

    /// Estimated play time of a clip of `len` bytes.
    #[must_use]
    pub fn clip_duration(&self, len: usize) -> Duration {
        let bits = (len as u64).saturating_mul(8);
        // kbps is bits per millisecond
        let millis = bits / u64::from(self.bitrate_kbps.max(1));
        Duration::from_millis(millis).min(self.max_clip)
    }
}

#[async_trait]
impl AudioOutput for TimedOutput {
    async fn play(&self, clip: Vec<u8>) -> Result<(), AudioError> {
        let duration = self.clip_duration(clip.len());
        debug!(bytes = clip.len(), duration_ms = duration.as_millis(), "Playing clip");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
