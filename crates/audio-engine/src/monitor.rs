//! Position monitor.
//!
//! One polling thread per session. It captures the session token at start and
//! retires itself the first time the engine's current token differs; nothing
//! ever joins or kills it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use audio_engine_types::TrackDescriptor;
use crossbeam_channel::Sender;

use crate::engine::ControlMsg;
use crate::pipeline::PositionProbe;

/// What the monitor tells the control loop.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorReport {
    Progress {
        position_secs: f64,
        duration_secs: f64,
    },
    /// A range-limited track reached its logical end.
    RangeEnd,
}

pub(crate) struct MonitorSpec {
    pub(crate) session: u64,
    pub(crate) current: Arc<AtomicU64>,
    pub(crate) probe: PositionProbe,
    pub(crate) track: TrackDescriptor,
    pub(crate) interval: Duration,
    pub(crate) tx: Sender<ControlMsg>,
}

/// Logical duration of `track` given the physical duration from the graph.
pub fn logical_duration(track: &TrackDescriptor, physical: Option<f64>) -> Option<f64> {
    track
        .duration_secs
        .filter(|d| *d > 0.0)
        .or_else(|| physical.map(|p| (p - track.start_offset_secs).max(0.0)))
}

/// End of range for tracks that stop before their resource does.
///
/// Only cue-style tracks (start offset, or an explicit duration shorter than
/// the resource) are cut by the monitor; everything else ends on native EOS.
pub fn range_end(track: &TrackDescriptor, physical: Option<f64>) -> Option<f64> {
    let logical = logical_duration(track, physical)?;
    let shorter_than_resource = physical
        .map(|p| track.start_offset_secs + logical < p)
        .unwrap_or(false);
    if track.start_offset_secs > 0.0 || shorter_than_resource {
        Some(logical)
    } else {
        None
    }
}

pub(crate) fn spawn_monitor(spec: MonitorSpec) {
    let session = spec.session;
    let spawned = thread::Builder::new()
        .name(format!("position-monitor-{session}"))
        .spawn(move || run(spec));
    if let Err(e) = spawned {
        tracing::warn!(session, "position monitor spawn failed: {e}");
    }
}

fn run(spec: MonitorSpec) {
    let mut last_second: Option<u64> = None;
    loop {
        thread::sleep(spec.interval);
        if spec.current.load(Ordering::Acquire) != spec.session {
            tracing::debug!(session = spec.session, "position monitor retired");
            return;
        }
        let Some(physical_pos) = spec.probe.position_secs() else {
            continue;
        };
        let physical_dur = spec.probe.duration_secs();
        let position = (physical_pos - spec.track.start_offset_secs).max(0.0);

        if let Some(end) = range_end(&spec.track, physical_dur) {
            if position >= end {
                send(&spec, MonitorReport::RangeEnd);
                return;
            }
        }

        let second = position.floor() as u64;
        if last_second == Some(second) {
            continue;
        }
        last_second = Some(second);
        let duration = logical_duration(&spec.track, physical_dur).unwrap_or(0.0);
        send(
            &spec,
            MonitorReport::Progress {
                position_secs: position,
                duration_secs: duration,
            },
        );
    }
}

fn send(spec: &MonitorSpec, report: MonitorReport) {
    let _ = spec.tx.send(ControlMsg::Monitor {
        session: spec.session,
        report,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_for(
        track: TrackDescriptor,
        probe: PositionProbe,
        current: Arc<AtomicU64>,
    ) -> (MonitorSpec, crossbeam_channel::Receiver<ControlMsg>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            MonitorSpec {
                session: 1,
                current,
                probe,
                track,
                interval: Duration::from_millis(5),
                tx,
            },
            rx,
        )
    }

    #[test]
    fn logical_duration_prefers_descriptor() {
        let t = TrackDescriptor::new("a").with_duration(30.0);
        assert_eq!(logical_duration(&t, Some(300.0)), Some(30.0));
        let t = TrackDescriptor::new("a").with_start_offset(100.0);
        assert_eq!(logical_duration(&t, Some(300.0)), Some(200.0));
        assert_eq!(logical_duration(&t, None), None);
    }

    #[test]
    fn range_end_only_for_cue_tracks() {
        let plain = TrackDescriptor::new("a.flac").with_duration(300.0);
        assert_eq!(range_end(&plain, Some(300.0)), None);
        let first_cue = TrackDescriptor::new("a.flac").with_duration(120.0);
        assert_eq!(range_end(&first_cue, Some(300.0)), Some(120.0));
        let later_cue = TrackDescriptor::new("a.flac")
            .with_start_offset(120.0)
            .with_duration(60.0);
        assert_eq!(range_end(&later_cue, Some(300.0)), Some(60.0));
    }

    #[test]
    fn reports_progress_relative_to_offset() {
        let probe = PositionProbe::new();
        probe.reset(125.0, 1000);
        probe.set_duration(Some(300.0));
        let track = TrackDescriptor::new("a.flac")
            .with_start_offset(120.0)
            .with_duration(60.0);
        let current = Arc::new(AtomicU64::new(1));
        let (spec, rx) = spec_for(track, probe, current.clone());
        spawn_monitor(spec);
        let msg = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        current.store(2, Ordering::Release);
        match msg {
            ControlMsg::Monitor {
                session,
                report:
                    MonitorReport::Progress {
                        position_secs,
                        duration_secs,
                    },
            } => {
                assert_eq!(session, 1);
                assert!((position_secs - 5.0).abs() < 0.01);
                assert_eq!(duration_secs, 60.0);
            }
            _ => panic!("expected progress"),
        }
    }

    #[test]
    fn end_of_range_is_reported_once() {
        let probe = PositionProbe::new();
        probe.reset(181.0, 1000);
        probe.set_duration(Some(300.0));
        let track = TrackDescriptor::new("a.flac")
            .with_start_offset(120.0)
            .with_duration(60.0);
        let (spec, rx) = spec_for(track, probe, Arc::new(AtomicU64::new(1)));
        spawn_monitor(spec);
        let msg = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            msg,
            ControlMsg::Monitor {
                report: MonitorReport::RangeEnd,
                ..
            }
        ));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn stale_token_retires_without_reporting() {
        let probe = PositionProbe::new();
        probe.reset(1.0, 1000);
        let current = Arc::new(AtomicU64::new(2));
        let (spec, rx) = spec_for(TrackDescriptor::new("a"), probe, current);
        spawn_monitor(spec);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn same_second_is_not_repeated() {
        let probe = PositionProbe::new();
        probe.reset(3.2, 1000);
        let current = Arc::new(AtomicU64::new(1));
        let (spec, rx) = spec_for(TrackDescriptor::new("a"), probe, current.clone());
        spawn_monitor(spec);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
        current.store(9, Ordering::Release);
    }
}
