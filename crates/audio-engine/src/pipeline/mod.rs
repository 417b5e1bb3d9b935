//! The processing graph seen from the control loop.
//!
//! The engine drives a graph only through [`Pipeline`]. [`graph::AudioGraph`]
//! is the real implementation (symphonia decode, rubato conversion, cpal
//! sink); tests substitute a fake.

pub mod graph;
mod stage;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use audio_engine_types::TrackDescriptor;

use crate::bus::Bus;
use crate::error::Result;
use crate::tee::Tee;

/// Format of the blocks leaving the tee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A reconfigurable playback graph.
///
/// All methods are called from the engine's control thread only.
pub trait Pipeline: Send {
    /// Unlink any previous source and link one for `track`, starting at
    /// `start_at_secs` into the physical resource. Stage threads report through `bus`.
    fn build(&mut self, track: &TrackDescriptor, start_at_secs: f64, bus: Bus) -> Result<()>;

    /// Run or hold the graph without rebuilding it.
    fn set_running(&mut self, running: bool);

    /// Reposition the linked source to `position_secs` (physical).
    fn seek(&mut self, position_secs: f64) -> Result<()>;

    /// Unlink the source and stop all stage threads. The sink stays open.
    fn teardown(&mut self);

    /// Linear gain of the volume element, 0.0..=1.0.
    fn set_volume(&mut self, gain: f32);

    /// Per-band gains in dB written to the equalizer element.
    fn set_equalizer(&mut self, gains_db: [f32; 10]);

    /// Position/duration counters of the current session.
    fn probe(&self) -> PositionProbe;

    /// Tee shared by the playback branch and optional extra branches.
    fn tee(&self) -> Arc<Tee>;
}

#[derive(Debug, Default)]
struct ProbeInner {
    played_frames: AtomicU64,
    sample_rate: AtomicU32,
    base_ms: AtomicU64,
    duration_ms: AtomicU64,
}

/// Lock-free position counters shared by the sink callback and the monitor.
///
/// Position is `base + played_frames / sample_rate`, in physical seconds.
#[derive(Clone, Debug, Default)]
pub struct PositionProbe {
    inner: Arc<ProbeInner>,
}

impl PositionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart counting from `base_secs` at `sample_rate`.
    pub fn reset(&self, base_secs: f64, sample_rate: u32) {
        self.inner
            .base_ms
            .store(secs_to_ms(base_secs), Ordering::Relaxed);
        self.inner.played_frames.store(0, Ordering::Relaxed);
        self.inner.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Clear everything (no session bound).
    pub fn clear(&self) {
        self.reset(0.0, 0);
        self.inner.duration_ms.store(0, Ordering::Relaxed);
    }

    pub fn advance(&self, frames: u64) {
        self.inner.played_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_duration(&self, secs: Option<f64>) {
        self.inner
            .duration_ms
            .store(secs.map(secs_to_ms).unwrap_or(0), Ordering::Relaxed);
    }

    /// Physical position in seconds; `None` until a rate is known.
    pub fn position_secs(&self) -> Option<f64> {
        let rate = self.inner.sample_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return None;
        }
        let base = self.inner.base_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        let played = self.inner.played_frames.load(Ordering::Relaxed) as f64 / rate as f64;
        Some(base + played)
    }

    /// Physical duration in seconds when the source reported one.
    pub fn duration_secs(&self) -> Option<f64> {
        match self.inner.duration_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms as f64 / 1000.0),
        }
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_none_without_rate() {
        let probe = PositionProbe::new();
        probe.advance(48_000);
        assert!(probe.position_secs().is_none());
    }

    #[test]
    fn position_adds_base_and_played_frames() {
        let probe = PositionProbe::new();
        probe.reset(10.0, 48_000);
        probe.advance(96_000);
        assert_eq!(probe.position_secs(), Some(12.0));
    }

    #[test]
    fn clones_share_counters() {
        let probe = PositionProbe::new();
        let sink_side = probe.clone();
        probe.reset(0.0, 1000);
        sink_side.advance(500);
        assert_eq!(probe.position_secs(), Some(0.5));
    }

    #[test]
    fn duration_zero_means_unknown() {
        let probe = PositionProbe::new();
        assert!(probe.duration_secs().is_none());
        probe.set_duration(Some(61.5));
        assert_eq!(probe.duration_secs(), Some(61.5));
        probe.clear();
        assert!(probe.duration_secs().is_none());
    }
}
