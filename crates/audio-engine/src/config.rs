//! Engine configuration.
//!
//! One explicit struct handed to [`crate::engine::Engine`] at construction.
//! Every field has a default so a partial TOML table is enough.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Stage tuning shared by decode/convert/sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Converter chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration per stage queue.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

/// Top-level engine settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device substring; `None` selects the host default.
    pub device: Option<String>,
    /// Read-ahead capacity in bytes for network sources.
    pub network_buffer_bytes: usize,
    /// Consecutive stream errors tolerated before a session is failed.
    pub retry_threshold: u32,
    /// Position monitor polling interval.
    pub poll_interval_ms: u64,
    /// Whether equalizer gains are applied.
    pub equalizer_enabled: bool,
    /// Per-request timeout for network sources.
    pub http_timeout_secs: u64,
    /// Where in-progress recordings are written; system temp dir when unset.
    pub recording_temp_dir: Option<PathBuf>,
    pub playback: PlaybackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: None,
            network_buffer_bytes: 128 * 1024,
            retry_threshold: 2,
            poll_interval_ms: 100,
            equalizer_enabled: false,
            http_timeout_secs: 10,
            recording_temp_dir: None,
            playback: PlaybackConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn recording_dir(&self) -> PathBuf {
        self.recording_temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Parse a TOML document into a config, keeping defaults for missing keys.
    pub fn from_toml(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.network_buffer_bytes, 131_072);
        assert_eq!(cfg.retry_threshold, 2);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
        assert!(!cfg.equalizer_enabled);
        assert_eq!(cfg.playback.chunk_frames, 1024);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml(
            r#"
            retry_threshold = 5
            [playback]
            buffer_seconds = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retry_threshold, 5);
        assert_eq!(cfg.playback.buffer_seconds, 0.5);
        assert_eq!(cfg.playback.refill_max_frames, 4096);
        assert_eq!(cfg.network_buffer_bytes, 128 * 1024);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngineConfig::from_toml("retry_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Config(_)));
    }

    #[test]
    fn zero_poll_interval_is_bumped() {
        let cfg = EngineConfig {
            poll_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(1));
    }
}
