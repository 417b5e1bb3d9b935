//! Playback engine facade.
//!
//! [`Engine`] owns one control thread. Every public method is a non-blocking
//! send onto the control channel, except [`Engine::status`] which reads the
//! mirrored status store. Stage threads and the position monitor report
//! through the same channel, so the control thread is the only writer of
//! engine state.
//!
//! Each play request gets a session token. The token is bumped on the caller's
//! thread, so anything produced by an older session is recognisable as stale
//! the moment `play` or `stop` returns.

mod control;
mod notifications;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use audio_engine_types::{EngineStatus, Notification, TrackDescriptor};
use crossbeam_channel::{Receiver, Sender};

use crate::bus::BusEvent;
use crate::config::EngineConfig;
use crate::equalizer::BAND_COUNT;
use crate::error::Result;
use crate::monitor::MonitorReport;
use crate::pipeline::Pipeline;
use crate::pipeline::graph::AudioGraph;
use crate::status::EngineStatusState;

use control::Controller;
pub use notifications::Notifications;

/// Everything the control thread consumes.
pub(crate) enum ControlMsg {
    Command(Command),
    Bus(BusEvent),
    Monitor { session: u64, report: MonitorReport },
}

/// Caller requests, in the order they were issued.
#[derive(Debug)]
pub(crate) enum Command {
    Play {
        track: TrackDescriptor,
        session: u64,
    },
    Pause,
    Resume,
    Stop {
        remember_position: bool,
    },
    Seek {
        percent: f64,
        offset_secs: f64,
    },
    SetVolume(f32),
    SetEqualizer {
        preamp_db: f32,
        bands_db: [f32; BAND_COUNT],
        force: bool,
    },
    SetEqualizerEnabled(bool),
    AttachRecorder(PathBuf),
    DetachRecorder,
    Shutdown,
    /// Acknowledged once everything queued before it has been handled.
    #[cfg(test)]
    Barrier(Sender<()>),
}

/// Handle to a running playback engine.
pub struct Engine {
    tx: Sender<ControlMsg>,
    session: Arc<AtomicU64>,
    status: Arc<Mutex<EngineStatusState>>,
    notifications: Receiver<Notification>,
    control: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine on the real audio graph.
    ///
    /// The output device is opened lazily, on the first play.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let graph = AudioGraph::new(config.clone());
        Self::with_pipeline(config, Box::new(graph))
    }

    /// Start an engine driving an arbitrary [`Pipeline`].
    pub fn with_pipeline(config: EngineConfig, pipeline: Box<dyn Pipeline>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (notify_tx, notifications) = crossbeam_channel::unbounded();
        let session = Arc::new(AtomicU64::new(0));
        let status = EngineStatusState::shared();
        if let Ok(mut s) = status.lock() {
            s.equalizer_enabled = config.equalizer_enabled;
        }

        let controller = Controller::new(
            config,
            pipeline,
            tx.clone(),
            session.clone(),
            notify_tx,
            status.clone(),
        );
        let control = std::thread::Builder::new()
            .name("engine-control".to_string())
            .spawn(move || controller.run(rx))?;

        Ok(Self {
            tx,
            session,
            status,
            notifications,
            control: Some(control),
        })
    }

    /// Bind `track` and start playing it. Returns the new session token.
    pub fn play(&self, track: TrackDescriptor) -> u64 {
        let session = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.send(Command::Play { track, session });
        session
    }

    /// No-op unless playing.
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// No-op unless paused.
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Tear the session down. With `remember_position` the next play of the
    /// same track resumes where this one stopped.
    pub fn stop(&self, remember_position: bool) {
        self.session.fetch_add(1, Ordering::AcqRel);
        self.send(Command::Stop { remember_position });
    }

    /// Seek to `offset_secs + percent% × duration`, track-relative.
    pub fn seek(&self, percent: f64, offset_secs: f64) {
        self.send(Command::Seek {
            percent,
            offset_secs,
        });
    }

    /// Output volume, 0..=100.
    pub fn set_volume(&self, percent: f32) {
        self.send(Command::SetVolume(percent));
    }

    /// Store preamp and band gains (dB). `force` writes even while disabled.
    pub fn set_equalizer(&self, preamp_db: f32, bands_db: [f32; BAND_COUNT], force: bool) {
        self.send(Command::SetEqualizer {
            preamp_db,
            bands_db,
            force,
        });
    }

    pub fn set_equalizer_enabled(&self, enabled: bool) {
        self.send(Command::SetEqualizerEnabled(enabled));
    }

    /// Record what is playing into `path` (WAV). Failures arrive as
    /// [`Notification::RecordingError`].
    pub fn attach_recorder(&self, path: impl Into<PathBuf>) {
        self.send(Command::AttachRecorder(path.into()));
    }

    /// Finalize the recording; the outcome arrives as a notification.
    pub fn detach_recorder(&self) {
        self.send(Command::DetachRecorder);
    }

    /// Token of the most recent play or stop request.
    pub fn current_session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    pub fn status(&self) -> EngineStatus {
        match self.status.lock() {
            Ok(s) => s.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    /// Receiver for engine notifications. Clones share one queue.
    pub fn notifications(&self) -> Notifications {
        Notifications::new(self.notifications.clone(), self.session.clone())
    }

    /// Stop playback, finalize any recording and join the control thread.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        self.session.fetch_add(1, Ordering::AcqRel);
        self.send(Command::Shutdown);
        if control.join().is_err() {
            tracing::warn!("engine control thread panicked");
        }
    }

    fn send(&self, cmd: Command) {
        if self.tx.send(ControlMsg::Command(cmd)).is_err() {
            tracing::warn!("engine control thread is gone; command dropped");
        }
    }

    /// Wait until every message queued so far has been handled.
    #[cfg(test)]
    pub(crate) fn sync(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Command::Barrier(tx));
        let _ = rx.recv_timeout(std::time::Duration::from_secs(5));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
