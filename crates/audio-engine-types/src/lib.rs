use serde::{Deserialize, Serialize};

/// Logical playback state owned by the engine's state machine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No session is running (initial state).
    #[default]
    Stop,
    /// A session is running and the caller wants audio.
    Play,
    /// A session exists but output is held.
    Pause,
}

/// How a track is expected to behave on the wire.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// A finite resource (local file or downloadable URL).
    #[default]
    Normal,
    /// An endless network stream that is expected to drop and come back.
    Radio,
}

/// Caller-owned status of a descriptor. The engine never persists it.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    Failed,
}

/// Buffering state of the live session's source.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferingState {
    #[default]
    Unbuffered,
    Buffering,
    Ready,
}

/// One playable unit.
///
/// `start_offset_secs` places a logical track partway into a shared physical
/// resource (cue-sheet sub-tracks); position and duration reported by the engine
/// are relative to it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackDescriptor {
    /// Local path, `file://` URI or `http(s)://` URI.
    pub locator: String,
    pub display: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    /// Logical duration; when absent the pipeline-reported duration is used.
    pub duration_secs: Option<f64>,
    /// Seconds into the underlying resource where this track begins.
    #[serde(default)]
    pub start_offset_secs: f64,
    #[serde(default)]
    pub kind: TrackKind,
    #[serde(default)]
    pub status: TrackStatus,
}

impl TrackDescriptor {
    /// Descriptor for a plain resource with no metadata.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }

    /// Descriptor for an endless radio stream.
    pub fn radio(locator: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Radio,
            ..Self::new(locator)
        }
    }

    pub fn with_start_offset(mut self, secs: f64) -> Self {
        self.start_offset_secs = secs.max(0.0);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn is_radio(&self) -> bool {
        self.kind == TrackKind::Radio
    }

    /// Text shown to users: display text, then "artist - title", then the locator.
    pub fn label(&self) -> String {
        if let Some(display) = self.display.as_deref().filter(|s| !s.is_empty()) {
            return display.to_string();
        }
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            (None, Some(title)) => title.to_string(),
            _ => self.locator.clone(),
        }
    }

    /// Whether two descriptors address the same logical track.
    pub fn same_track(&self, other: &TrackDescriptor) -> bool {
        self.locator == other.locator && self.start_offset_secs == other.start_offset_secs
    }
}

/// Advisory, one-way notifications emitted by the engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Effective duration of the bound track became known.
    DurationKnown { duration_secs: f64 },
    /// Integer-second progress of the live session.
    Progress {
        session: u64,
        position_secs: f64,
        duration_secs: f64,
    },
    /// The track finished; the caller decides what plays next.
    EndOfTrack,
    /// Stream title or container title changed.
    TitleChanged { text: String },
    /// Fatal playback error; the engine is left in `Stop`.
    Error { message: String },
    /// The state machine moved to `state`.
    StateChanged { state: PlaybackState },
    /// Recording failed; playback is unaffected.
    RecordingError { message: String },
    /// Recording was finalized at `path`.
    RecordingFinished { path: String },
}

/// Point-in-time view of the engine, cheap to poll from a UI thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    pub state: PlaybackState,
    /// Token of the live session, if any.
    pub session: Option<u64>,
    /// Label of the bound track.
    pub now_playing: Option<String>,
    /// Track-relative position in seconds.
    pub position_secs: Option<f64>,
    /// Effective duration in seconds.
    pub duration_secs: Option<f64>,
    pub buffering: BufferingState,
    /// Volume percent (0..=100).
    pub volume_percent: f32,
    pub equalizer_enabled: bool,
    /// Final destination of the attached recorder.
    pub recording_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_display_then_artist_title() {
        let mut track = TrackDescriptor::new("/music/a.flac");
        assert_eq!(track.label(), "/music/a.flac");
        track.title = Some("Song".to_string());
        assert_eq!(track.label(), "Song");
        track.artist = Some("Band".to_string());
        assert_eq!(track.label(), "Band - Song");
        track.display = Some("Custom".to_string());
        assert_eq!(track.label(), "Custom");
    }

    #[test]
    fn same_track_compares_locator_and_offset() {
        let a = TrackDescriptor::new("/music/album.flac").with_start_offset(120.0);
        let b = TrackDescriptor::new("/music/album.flac").with_start_offset(240.0);
        let c = TrackDescriptor::new("/music/album.flac").with_start_offset(120.0);
        assert!(!a.same_track(&b));
        assert!(a.same_track(&c));
    }

    #[test]
    fn start_offset_is_never_negative() {
        let t = TrackDescriptor::new("x.mp3").with_start_offset(-3.0);
        assert_eq!(t.start_offset_secs, 0.0);
    }

    #[test]
    fn notification_serializes_with_event_tag() {
        let n = Notification::StateChanged {
            state: PlaybackState::Pause,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["state"], "pause");
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let t: TrackDescriptor =
            serde_json::from_str(r#"{"locator":"http://radio/stream","kind":"radio"}"#).unwrap();
        assert!(t.is_radio());
        assert_eq!(t.start_offset_secs, 0.0);
        assert_eq!(t.status, TrackStatus::Idle);
        assert!(t.duration_secs.is_none());
    }
}
