//! Fan-out point after conversion.
//!
//! The playback branch is wired directly by the graph's tee stage; extra
//! branches (the recorder) request a pad and receive copies of every block
//! pushed through the tee. Pads are bounded and never block the playback
//! branch: a slow branch loses blocks instead.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::pipeline::StreamFormat;

/// Identifier of a requested pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PadId(u64);

/// One block of interleaved samples travelling through the tee.
pub type Block = Arc<[f32]>;

struct Pad {
    id: PadId,
    tx: Sender<Block>,
}

/// Duplicates blocks to every requested pad.
#[derive(Default)]
pub struct Tee {
    pads: Mutex<Vec<Pad>>,
    format: Mutex<Option<StreamFormat>>,
    next_id: AtomicU64,
    dropped_blocks: AtomicU64,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a new source pad holding up to `capacity` blocks.
    pub fn request_pad(&self, capacity: usize) -> (PadId, Receiver<Block>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let id = PadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut pads) = self.pads.lock() {
            pads.push(Pad { id, tx });
        }
        (id, rx)
    }

    /// Release a pad. Its receiver sees a disconnect once drained.
    pub fn release_pad(&self, id: PadId) -> bool {
        let Ok(mut pads) = self.pads.lock() else {
            return false;
        };
        let before = pads.len();
        pads.retain(|p| p.id != id);
        pads.len() != before
    }

    /// Format of the blocks currently flowing, once the source is probed.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format.lock().ok().and_then(|f| *f)
    }

    pub fn set_format(&self, format: Option<StreamFormat>) {
        if let Ok(mut f) = self.format.lock() {
            *f = format;
        }
    }

    pub fn pad_count(&self) -> usize {
        self.pads.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    /// Copy `samples` to every pad without blocking.
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut pads) = self.pads.lock() else {
            return;
        };
        if pads.is_empty() {
            return;
        }
        let block: Block = Arc::from(samples);
        pads.retain(|pad| match pad.tx.try_send(block.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reaches_every_pad() {
        let tee = Tee::new();
        let (_a, rx_a) = tee.request_pad(4);
        let (_b, rx_b) = tee.request_pad(4);
        tee.push(&[0.5, -0.5]);
        assert_eq!(&*rx_a.try_recv().unwrap(), &[0.5, -0.5]);
        assert_eq!(&*rx_b.try_recv().unwrap(), &[0.5, -0.5]);
    }

    #[test]
    fn released_pad_disconnects() {
        let tee = Tee::new();
        let (id, rx) = tee.request_pad(4);
        assert!(tee.release_pad(id));
        assert!(!tee.release_pad(id));
        tee.push(&[1.0]);
        assert!(rx.recv().is_err());
        assert_eq!(tee.pad_count(), 0);
    }

    #[test]
    fn full_pad_drops_instead_of_blocking() {
        let tee = Tee::new();
        let (_id, rx) = tee.request_pad(1);
        tee.push(&[1.0]);
        tee.push(&[2.0]);
        assert_eq!(tee.dropped_blocks(), 1);
        assert_eq!(&*rx.try_recv().unwrap(), &[1.0]);
    }

    #[test]
    fn dropped_receiver_prunes_pad() {
        let tee = Tee::new();
        let (_id, rx) = tee.request_pad(1);
        drop(rx);
        tee.push(&[1.0]);
        assert_eq!(tee.pad_count(), 0);
    }
}
