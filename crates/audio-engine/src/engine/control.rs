//! The control thread: the only place engine state changes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use audio_engine_types::{Notification, PlaybackState, TrackDescriptor};
use crossbeam_channel::{Receiver, Sender};

use super::{Command, ControlMsg};
use crate::buffering::{BufferingAction, BufferingController};
use crate::bus::{Bus, BusEvent, BusMessage, StreamFault};
use crate::config::EngineConfig;
use crate::equalizer::EqualizerApplier;
use crate::error::{EngineError, Result};
use crate::monitor::{MonitorReport, MonitorSpec, logical_duration, spawn_monitor};
use crate::pipeline::Pipeline;
use crate::recorder::RecorderManager;
use crate::recovery::{ErrorRecovery, Recovery};
use crate::status::EngineStatusState;

/// The session currently bound to the graph.
struct LiveSession {
    session: u64,
    track: TrackDescriptor,
    /// Track-relative position the session was built at.
    started_at: f64,
    last_position: Option<f64>,
    /// Started by error recovery; cleared by the first progress tick.
    retried: bool,
    title: Option<String>,
    logical_duration: Option<f64>,
    physical_duration: Option<f64>,
}

impl LiveSession {
    fn new(session: u64, track: TrackDescriptor, started_at: f64, retried: bool) -> Self {
        Self {
            session,
            track,
            started_at,
            last_position: None,
            retried,
            title: None,
            logical_duration: None,
            physical_duration: None,
        }
    }

    /// Where a retry of this session picks up.
    fn resume_at(&self) -> f64 {
        if self.track.is_radio() {
            0.0
        } else {
            self.last_position.unwrap_or(self.started_at)
        }
    }
}

pub(super) struct Controller {
    config: EngineConfig,
    pipeline: Box<dyn Pipeline>,
    tx: Sender<ControlMsg>,
    token: Arc<AtomicU64>,
    notify: Sender<Notification>,
    status: Arc<Mutex<EngineStatusState>>,
    state: PlaybackState,
    live: Option<LiveSession>,
    buffering: BufferingController,
    recovery: ErrorRecovery,
    equalizer: EqualizerApplier,
    recorder: RecorderManager,
    volume_percent: f32,
    resume_point: Option<(TrackDescriptor, f64)>,
}

impl Controller {
    pub(super) fn new(
        config: EngineConfig,
        pipeline: Box<dyn Pipeline>,
        tx: Sender<ControlMsg>,
        token: Arc<AtomicU64>,
        notify: Sender<Notification>,
        status: Arc<Mutex<EngineStatusState>>,
    ) -> Self {
        Self {
            recovery: ErrorRecovery::new(config.retry_threshold),
            equalizer: EqualizerApplier::new(config.equalizer_enabled),
            recorder: RecorderManager::new(config.recording_dir()),
            config,
            pipeline,
            tx,
            token,
            notify,
            status,
            state: PlaybackState::Stop,
            live: None,
            buffering: BufferingController::new(),
            volume_percent: 100.0,
            resume_point: None,
        }
    }

    pub(super) fn run(mut self, rx: Receiver<ControlMsg>) {
        tracing::info!(
            retry_threshold = self.config.retry_threshold,
            equalizer = self.equalizer.settings().enabled,
            "engine control loop started"
        );
        while let Ok(msg) = rx.recv() {
            match msg {
                ControlMsg::Command(Command::Shutdown) => break,
                ControlMsg::Command(cmd) => self.on_command(cmd),
                ControlMsg::Bus(event) => self.on_bus(event),
                ControlMsg::Monitor { session, report } => self.on_monitor(session, report),
            }
            self.publish_status();
        }
        self.end_session();
        self.set_state(PlaybackState::Stop);
        self.publish_status();
        tracing::info!("engine control loop stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { track, session } => self.play(track, session),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop { remember_position } => self.stop(remember_position),
            Command::Seek {
                percent,
                offset_secs,
            } => self.seek(percent, offset_secs),
            Command::SetVolume(percent) => self.set_volume(percent),
            Command::SetEqualizer {
                preamp_db,
                bands_db,
                force,
            } => {
                if let Some(gains) = self.equalizer.apply(preamp_db, bands_db, force) {
                    self.pipeline.set_equalizer(gains);
                }
            }
            Command::SetEqualizerEnabled(enabled) => {
                let gains = self.equalizer.set_enabled(enabled);
                self.pipeline.set_equalizer(gains);
                tracing::info!(enabled, "equalizer toggled");
            }
            Command::AttachRecorder(path) => self.attach_recorder(path),
            Command::DetachRecorder => match self.recorder.detach() {
                Some(outcome) => self.report_recording(outcome),
                None => tracing::debug!("detach requested with no recorder attached"),
            },
            Command::Shutdown => {}
            #[cfg(test)]
            Command::Barrier(ack) => {
                self.publish_status();
                let _ = ack.send(());
            }
        }
    }

    fn play(&mut self, track: TrackDescriptor, session: u64) {
        let current = self.token.load(Ordering::Acquire);
        if session != current {
            tracing::debug!(session, current, "superseded play skipped");
            return;
        }
        let start_at = match self.resume_point.take() {
            Some((remembered, position)) if remembered.same_track(&track) => position,
            _ => 0.0,
        };
        tracing::info!(
            session,
            locator = %track.locator,
            label = %track.label(),
            start_at,
            "play"
        );
        self.recovery.on_success();
        self.start_session(track, session, start_at, false);
    }

    /// Build the graph for `track` under `session` and start it.
    fn start_session(&mut self, track: TrackDescriptor, session: u64, start_at: f64, retried: bool) {
        self.finish_recording();
        self.buffering.reset();
        let start_at = start_at.max(0.0);
        let bus = Bus::new(session, self.tx.clone());
        let built = self
            .pipeline
            .build(&track, track.start_offset_secs + start_at, bus);
        self.live = Some(LiveSession::new(session, track.clone(), start_at, retried));

        if let Err(e) = built {
            if e.is_fatal() {
                self.fail(e.to_string());
            } else {
                self.on_fault(StreamFault::Transient(e.to_string()));
            }
            return;
        }

        if let Some(gains) = self.equalizer.current(true) {
            self.pipeline.set_equalizer(gains);
        }
        self.pipeline.set_volume(self.volume_percent / 100.0);
        self.pipeline.set_running(true);
        spawn_monitor(MonitorSpec {
            session,
            current: self.token.clone(),
            probe: self.pipeline.probe(),
            track,
            interval: self.config.poll_interval(),
            tx: self.tx.clone(),
        });
        self.set_state(PlaybackState::Play);
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Play {
            return;
        }
        self.pipeline.set_running(false);
        self.set_state(PlaybackState::Pause);
    }

    fn resume(&mut self) {
        if self.state != PlaybackState::Pause {
            return;
        }
        if self.buffering.is_buffering() {
            tracing::debug!("resume while buffering; graph stays held");
        } else {
            self.pipeline.set_running(true);
        }
        self.set_state(PlaybackState::Play);
    }

    fn stop(&mut self, remember_position: bool) {
        if self.state == PlaybackState::Stop {
            return;
        }
        self.resume_point = match (&self.live, remember_position) {
            (Some(live), true) => self.track_position().map(|p| (live.track.clone(), p)),
            _ => None,
        };
        tracing::info!(resume_point = ?self.resume_point.as_ref().map(|r| r.1), "stop");
        self.end_session();
        self.set_state(PlaybackState::Stop);
    }

    fn seek(&mut self, percent: f64, offset_secs: f64) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        if live.track.is_radio() {
            tracing::debug!("seek ignored on radio stream");
            return;
        }
        let duration = logical_duration(&live.track, self.pipeline.probe().duration_secs());
        let target = seek_target(percent, offset_secs, duration.unwrap_or(0.0));
        let physical = live.track.start_offset_secs + target;
        tracing::info!(
            session = live.session,
            percent,
            offset_secs,
            target,
            "seek"
        );
        if let Err(e) = self.pipeline.seek(physical) {
            self.on_fault(StreamFault::Transient(e.to_string()));
        }
    }

    fn set_volume(&mut self, percent: f32) {
        self.volume_percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            100.0
        };
        self.pipeline.set_volume(self.volume_percent / 100.0);
    }

    fn attach_recorder(&mut self, path: PathBuf) {
        if self.live.is_none() {
            self.emit(Notification::RecordingError {
                message: EngineError::recording("nothing is playing").to_string(),
            });
            return;
        }
        if let Err(e) = self.recorder.attach(self.pipeline.tee(), path) {
            tracing::warn!("recorder attach failed: {e}");
            self.emit(Notification::RecordingError {
                message: e.to_string(),
            });
        }
    }

    fn finish_recording(&mut self) {
        if let Some(outcome) = self.recorder.detach() {
            self.report_recording(outcome);
        }
    }

    fn report_recording(&self, outcome: Result<PathBuf>) {
        match outcome {
            Ok(path) => self.emit(Notification::RecordingFinished {
                path: path.to_string_lossy().into_owned(),
            }),
            Err(e) => {
                tracing::warn!("recording failed: {e}");
                self.emit(Notification::RecordingError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Whether `session` is both bound to the graph and still the caller's latest.
    fn is_current(&self, session: u64) -> bool {
        self.live.as_ref().is_some_and(|l| l.session == session)
            && self.token.load(Ordering::Acquire) == session
    }

    fn on_bus(&mut self, event: BusEvent) {
        if !self.is_current(event.session) {
            tracing::trace!(session = event.session, message = ?event.message, "stale bus message dropped");
            return;
        }
        match event.message {
            BusMessage::Buffering(percent) => {
                match self.buffering.on_percent(percent, self.state) {
                    BufferingAction::Hold => {
                        tracing::debug!(percent, "buffering; holding graph");
                        self.pipeline.set_running(false);
                    }
                    BufferingAction::Release => {
                        tracing::debug!("buffer full; releasing graph");
                        self.pipeline.set_running(true);
                    }
                    BufferingAction::Nothing => {}
                }
            }
            BusMessage::Tag { title } => {
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                if live.title.as_deref() == Some(title.as_str()) {
                    return;
                }
                live.title = Some(title.clone());
                self.emit(Notification::TitleChanged { text: title });
            }
            BusMessage::DurationKnown(physical) => {
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                live.physical_duration = Some(physical);
                let Some(logical) = logical_duration(&live.track, Some(physical)) else {
                    return;
                };
                if live.logical_duration == Some(logical) {
                    return;
                }
                live.logical_duration = Some(logical);
                self.emit(Notification::DurationKnown {
                    duration_secs: logical,
                });
            }
            BusMessage::EndOfStream => self.end_of_track(),
            BusMessage::Error(fault) => self.on_fault(fault),
        }
    }

    fn on_monitor(&mut self, session: u64, report: MonitorReport) {
        if !self.is_current(session) {
            return;
        }
        match report {
            MonitorReport::Progress {
                position_secs,
                duration_secs,
            } => {
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                live.last_position = Some(position_secs);
                if live.retried {
                    live.retried = false;
                    self.recovery.on_success();
                }
                self.emit(Notification::Progress {
                    session,
                    position_secs,
                    duration_secs,
                });
            }
            MonitorReport::RangeEnd => self.end_of_track(),
        }
    }

    fn on_fault(&mut self, fault: StreamFault) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        let session = live.session;
        let track = live.track.clone();
        let resume_at = live.resume_at();
        match self.recovery.classify(track.kind, &fault) {
            Recovery::Reconnect => {
                tracing::info!(
                    session,
                    reconnects = self.recovery.reconnects(),
                    reason = fault.message(),
                    "radio stream went idle; reconnecting"
                );
                self.restart(session, track, 0.0);
            }
            Recovery::Retry { attempt } => {
                tracing::warn!(
                    session,
                    attempt,
                    resume_at,
                    reason = fault.message(),
                    "stream error; retrying"
                );
                self.restart(session, track, resume_at);
            }
            Recovery::Fail { message } => {
                tracing::error!(session, "playback failed: {message}");
                self.fail(message);
            }
        }
    }

    /// Rebuild `track` under a fresh token, unless the caller got there first.
    fn restart(&mut self, session: u64, track: TrackDescriptor, start_at: f64) {
        match self.token.compare_exchange(
            session,
            session + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.start_session(track, session + 1, start_at, true),
            Err(current) => {
                tracing::debug!(session, current, "recovery superseded by a newer request");
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.end_session();
        self.set_state(PlaybackState::Stop);
        self.emit(Notification::Error { message });
    }

    fn end_of_track(&mut self) {
        tracing::info!("end of track");
        self.resume_point = None;
        self.end_session();
        self.set_state(PlaybackState::Stop);
        self.emit(Notification::EndOfTrack);
    }

    /// Finalize recording, tear the graph down and retire the live token.
    fn end_session(&mut self) {
        self.finish_recording();
        self.pipeline.teardown();
        self.buffering.reset();
        if let Some(live) = self.live.take() {
            let _ = self.token.compare_exchange(
                live.session,
                live.session + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Track-relative position of the live session.
    fn track_position(&self) -> Option<f64> {
        let live = self.live.as_ref()?;
        let physical = self.pipeline.probe().position_secs()?;
        Some((physical - live.track.start_offset_secs).max(0.0))
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = ?self.state, to = ?state, "playback state changed");
        self.state = state;
        self.emit(Notification::StateChanged { state });
    }

    fn emit(&self, notification: Notification) {
        let _ = self.notify.send(notification);
    }

    fn publish_status(&self) {
        let Ok(mut s) = self.status.lock() else {
            return;
        };
        match &self.live {
            Some(live) => {
                s.session = Some(live.session);
                s.now_playing = Some(live.track.clone());
                s.physical_duration_secs = live.physical_duration;
                s.probe = Some(self.pipeline.probe());
            }
            None => s.clear_playback(),
        }
        s.state = self.state;
        s.buffering = self.buffering.state();
        s.volume_percent = self.volume_percent;
        s.equalizer_enabled = self.equalizer.settings().enabled;
        s.recording_to = self.recorder.destination().map(Path::to_path_buf);
    }
}

/// Track-relative seek target: `offset + clamp(percent, 0, 100)% × duration`.
pub(super) fn seek_target(percent: f64, offset_secs: f64, duration_secs: f64) -> f64 {
    let percent = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let offset = if offset_secs.is_finite() {
        offset_secs
    } else {
        0.0
    };
    let duration = duration_secs.max(0.0);
    (offset + percent / 100.0 * duration).max(0.0)
}
