//! Bounded sample queues linking the graph's stage threads.
//!
//! Every hop in the graph (decode → convert → tee stage → sink) is a
//! [`SampleQueue`] of interleaved `f32`. Producers block when the queue is
//! full, the sink callback drains without blocking, and `close()` lets every
//! stage unwind deterministically when a source is unlinked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// The channel count is fixed for the queue's lifetime. The `closed` flag lives
/// under the same mutex as the samples so waiters never miss a close.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    capacity_samples: usize,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// How a consumer pulls frames out of the queue.
pub enum Pull {
    /// Block until exactly `frames` are queued; `None` if closed short.
    Exact { frames: usize },
    /// Block until something is queued, then take up to `max_frames`.
    UpTo { max_frames: usize },
    /// Take up to `max_frames` right now; `None` when empty.
    Available { max_frames: usize },
}

/// Capacity in samples for `seconds` of audio at `(rate_hz, channels)`.
///
/// Non-finite or non-positive `seconds` fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity_samples: capacity_samples.max(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_samples / self.channels
    }

    /// Best-effort count of queued frames.
    pub fn len_frames(&self) -> usize {
        self.inner
            .lock()
            .map(|g| g.samples.len() / self.channels)
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.closed).unwrap_or(true)
    }

    /// Mark the queue finished and wake every waiter. Idempotent.
    pub fn close(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.closed = true;
        }
        self.cv.notify_all();
    }

    /// Drop everything queued without closing (used when a seek relinks upstream).
    pub fn clear(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.samples.clear();
        }
        self.cv.notify_all();
    }

    /// Push samples, blocking while full.
    ///
    /// Returns `false` when the queue was closed before everything was accepted;
    /// the remainder is dropped.
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let Ok(mut g) = self.inner.lock() else {
                return false;
            };
            while g.samples.len() >= self.capacity_samples && !g.closed {
                g = match self.cv.wait(g) {
                    Ok(g) => g,
                    Err(_) => return false,
                };
            }
            if g.closed {
                return false;
            }
            let room = self.capacity_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pull frames according to `pull`. `None` once closed and nothing satisfies the request.
    pub fn pull(&self, pull: Pull) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().ok()?;
        let want_samples = match pull {
            Pull::Exact { frames } => {
                let want = frames * self.channels;
                while g.samples.len() < want && !g.closed {
                    g = self.cv.wait(g).ok()?;
                }
                if g.samples.len() < want {
                    return None;
                }
                want
            }
            Pull::UpTo { max_frames } => {
                while g.samples.is_empty() && !g.closed {
                    g = self.cv.wait(g).ok()?;
                }
                whole_frames(g.samples.len(), self.channels, max_frames)
            }
            Pull::Available { max_frames } => {
                whole_frames(g.samples.len(), self.channels, max_frames)
            }
        };
        if want_samples == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..want_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until closed and drained, or `cancel` is raised.
    ///
    /// Returns `true` on a natural drain.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let Ok(mut g) = self.inner.lock() else {
            return false;
        };
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.closed && g.samples.is_empty() {
                return true;
            }
            g = match self.cv.wait_timeout(g, Duration::from_millis(50)) {
                Ok((g, _)) => g,
                Err(_) => return false,
            };
        }
    }
}

fn whole_frames(queued_samples: usize, channels: usize, max_frames: usize) -> usize {
    (queued_samples / channels).min(max_frames) * channels
}

/// Shared handle type used across stages.
pub type SharedQueue = Arc<SampleQueue>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_for_falls_back_on_bad_seconds() {
        assert_eq!(capacity_for(48_000, 2, 2.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, 0.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, f32::NAN), 192_000);
    }

    #[test]
    fn available_returns_none_when_empty() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pull(Pull::Available { max_frames: 4 }).is_none());
    }

    #[test]
    fn available_only_returns_whole_frames() {
        let q = SampleQueue::new(2, 16);
        q.push(&[0.1, 0.2, 0.3]);
        let out = q.pull(Pull::Available { max_frames: 8 }).unwrap();
        assert_eq!(out, vec![0.1, 0.2]);
    }

    #[test]
    fn exact_waits_for_producer() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let consumer = q.clone();
        let handle = thread::spawn(move || consumer.pull(Pull::Exact { frames: 3 }));
        q.push(&[0.1, 0.2, 0.3, 0.4]);
        q.push(&[0.5, 0.6]);
        assert_eq!(handle.join().unwrap().map(|v| v.len()), Some(6));
    }

    #[test]
    fn close_releases_blocked_producer() {
        let q = Arc::new(SampleQueue::new(1, 2));
        q.push(&[1.0, 2.0]);
        let producer = q.clone();
        let handle = thread::spawn(move || producer.push(&[3.0]));
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn up_to_drains_tail_after_close() {
        let q = SampleQueue::new(2, 64);
        q.push(&[0.1, 0.2, 0.3, 0.4]);
        q.close();
        assert_eq!(q.pull(Pull::UpTo { max_frames: 8 }).map(|v| v.len()), Some(4));
        assert!(q.pull(Pull::UpTo { max_frames: 8 }).is_none());
    }

    #[test]
    fn clear_discards_without_closing() {
        let q = SampleQueue::new(1, 8);
        q.push(&[1.0, 2.0]);
        q.clear();
        assert_eq!(q.len_frames(), 0);
        assert!(!q.is_closed());
    }

    #[test]
    fn wait_drained_honours_cancel() {
        let q = SampleQueue::new(1, 8);
        q.push(&[1.0]);
        let cancel = AtomicBool::new(true);
        assert!(!q.wait_drained(&cancel));
    }
}
