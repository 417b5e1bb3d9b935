//! Stage threads of one linked source, and the tee stage itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::bus::{Bus, BusMessage};
use crate::equalizer::{EqualizerBank, SharedGains};
use crate::queue::{Pull, SampleQueue, SharedQueue};
use crate::tee::Tee;

/// Element settings written by the control thread and read by the tee stage.
#[derive(Debug)]
pub struct StageControls {
    volume_bits: AtomicU32,
    pub(crate) gains: SharedGains,
}

impl Default for StageControls {
    fn default() -> Self {
        Self {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            gains: SharedGains::default(),
        }
    }
}

impl StageControls {
    pub fn set_volume(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 1.0 };
        self.volume_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
struct Registry {
    unlinked: bool,
    queues: Vec<SharedQueue>,
    handles: Vec<JoinHandle<()>>,
}

/// Threads and queues belonging to one linked source.
///
/// Stage threads register what they create; [`StageSet::unlink`] cancels,
/// closes every queue and joins every thread. Once unlinked nothing new can be
/// registered.
#[derive(Default)]
pub struct StageSet {
    cancel: Arc<AtomicBool>,
    registry: Mutex<Registry>,
}

impl StageSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Stop the stages without joining them (used when a stage fails).
    pub fn abort(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Ok(reg) = self.registry.lock() {
            reg.queues.iter().for_each(|q| q.close());
        }
    }

    /// Register a queue; refused (and closed) once unlinked.
    pub fn queue(&self, queue: SampleQueue) -> Option<SharedQueue> {
        let queue = Arc::new(queue);
        let Ok(mut reg) = self.registry.lock() else {
            return None;
        };
        if reg.unlinked {
            return None;
        }
        reg.queues.push(queue.clone());
        Some(queue)
    }

    /// Spawn a named stage thread; refused once unlinked.
    pub fn spawn(&self, name: &str, f: impl FnOnce() + Send + 'static) -> bool {
        let Ok(mut reg) = self.registry.lock() else {
            return false;
        };
        if reg.unlinked {
            return false;
        }
        match std::thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                reg.handles.push(handle);
                true
            }
            Err(e) => {
                tracing::error!(stage = name, "stage spawn failed: {e}");
                false
            }
        }
    }

    /// Run `f` only while still linked, under the registry lock.
    pub fn while_linked(&self, f: impl FnOnce()) -> bool {
        let Ok(reg) = self.registry.lock() else {
            return false;
        };
        if reg.unlinked {
            return false;
        }
        f();
        drop(reg);
        true
    }

    /// Cancel, close all queues and join all stage threads.
    pub fn unlink(&self) {
        let (queues, handles) = match self.registry.lock() {
            Ok(mut reg) => {
                reg.unlinked = true;
                self.cancel.store(true, Ordering::Relaxed);
                (
                    std::mem::take(&mut reg.queues),
                    std::mem::take(&mut reg.handles),
                )
            }
            Err(_) => {
                self.cancel.store(true, Ordering::Relaxed);
                return;
            }
        };
        queues.iter().for_each(|q| q.close());
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("stage thread panicked");
            }
        }
    }
}

/// The tee stage: fan out converted blocks, then volume → equalizer → output.
///
/// Closes `output` when `input` ends. Posts end-of-stream once the sink has
/// drained everything, unless the stages were cancelled.
pub(crate) fn run_tee_stage(
    input: &SampleQueue,
    output: &SampleQueue,
    tee: &Tee,
    controls: &StageControls,
    mut eq: EqualizerBank,
    chunk_frames: usize,
    cancel: &AtomicBool,
    bus: &Bus,
) {
    let mut eq_version = u64::MAX;
    while let Some(mut block) = input.pull(Pull::UpTo {
        max_frames: chunk_frames.max(1),
    }) {
        tee.push(&block);

        let version = controls.gains.version();
        if version != eq_version {
            eq_version = version;
            eq.set_gains(controls.gains.load());
        }
        let gain = controls.volume();
        if gain != 1.0 {
            block.iter_mut().for_each(|s| *s *= gain);
        }
        eq.process(&mut block);

        if !output.push(&block) {
            return;
        }
    }
    output.close();
    if cancel.load(Ordering::Relaxed) {
        return;
    }
    if output.wait_drained(cancel) {
        bus.post(BusMessage::EndOfStream);
    }
}
