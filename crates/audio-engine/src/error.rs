//! Error taxonomy for the playback engine.

use thiserror::Error;

/// Errors raised by the engine and its graph.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The locator cannot be turned into a source (fatal, never retried).
    #[error("cannot build source for {locator}: {reason}")]
    SourceConstruction { locator: String, reason: String },

    /// Recording branch failure; playback carries on.
    #[error("recording error: {0}")]
    RecordingIo(String),

    /// Output device could not be opened or configured.
    #[error("output device error: {0}")]
    Device(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn source_construction(locator: &str, reason: impl Into<String>) -> Self {
        Self::SourceConstruction {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub fn recording(reason: impl Into<String>) -> Self {
        Self::RecordingIo(reason.into())
    }

    /// Whether retrying against the same locator can never help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceConstruction { .. } | Self::Device(_) | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_construction_is_fatal() {
        let err = EngineError::source_construction("ftp://x", "unsupported scheme");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "cannot build source for ftp://x: unsupported scheme"
        );
    }

    #[test]
    fn decode_and_recording_are_not_fatal() {
        assert!(!EngineError::Decode("reset".into()).is_fatal());
        assert!(!EngineError::recording("disk full").is_fatal());
    }
}
