use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use audio_engine_types::{BufferingState, EngineStatus, PlaybackState, TrackDescriptor};

use crate::monitor::logical_duration;
use crate::pipeline::PositionProbe;

/// Engine state mirrored by the control thread for `Engine::status()`.
#[derive(Debug)]
pub struct EngineStatusState {
    pub state: PlaybackState,
    /// Token of the live session, if one is bound.
    pub session: Option<u64>,
    pub now_playing: Option<TrackDescriptor>,
    /// Physical duration reported by the graph.
    pub physical_duration_secs: Option<f64>,
    pub buffering: BufferingState,
    pub volume_percent: f32,
    pub equalizer_enabled: bool,
    pub recording_to: Option<PathBuf>,
    /// Live counters of the graph, read at snapshot time.
    pub probe: Option<PositionProbe>,
}

impl Default for EngineStatusState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stop,
            session: None,
            now_playing: None,
            physical_duration_secs: None,
            buffering: BufferingState::Unbuffered,
            volume_percent: 100.0,
            equalizer_enabled: false,
            recording_to: None,
            probe: None,
        }
    }
}

impl EngineStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Snapshot with track-relative position and logical duration.
    pub fn snapshot(&self) -> EngineStatus {
        let track = self.now_playing.as_ref();
        let physical_duration = self
            .probe
            .as_ref()
            .and_then(|p| p.duration_secs())
            .or(self.physical_duration_secs);
        let position_secs = match (self.state, track, self.probe.as_ref()) {
            (PlaybackState::Stop, _, _) => None,
            (_, Some(track), Some(probe)) => probe
                .position_secs()
                .map(|p| (p - track.start_offset_secs).max(0.0)),
            _ => None,
        };
        EngineStatus {
            state: self.state,
            session: self.session,
            now_playing: track.map(|t| t.label()),
            position_secs,
            duration_secs: track.and_then(|t| logical_duration(t, physical_duration)),
            buffering: self.buffering,
            volume_percent: self.volume_percent,
            equalizer_enabled: self.equalizer_enabled,
            recording_to: self
                .recording_to
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Clear track-specific fields when a session ends.
    pub fn clear_playback(&mut self) {
        self.session = None;
        self.now_playing = None;
        self.physical_duration_secs = None;
        self.buffering = BufferingState::Unbuffered;
        self.probe = None;
    }
}
