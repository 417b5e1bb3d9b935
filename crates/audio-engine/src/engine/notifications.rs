//! Caller side of the notification channel.
//!
//! Progress is tagged with the session that produced it. The control thread
//! checks the token before sending, but a tick can already be queued (or be
//! racing the check) when `play` bumps the token, so the receiving end drops
//! progress whose session is no longer current.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use audio_engine_types::Notification;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};

/// Receiver for engine notifications. Clones share one queue.
#[derive(Clone)]
pub struct Notifications {
    rx: Receiver<Notification>,
    session: Arc<AtomicU64>,
}

impl Notifications {
    pub(crate) fn new(rx: Receiver<Notification>, session: Arc<AtomicU64>) -> Self {
        Self { rx, session }
    }

    /// Progress from a session that `play` or `stop` has since replaced.
    pub fn is_stale(&self, notification: &Notification) -> bool {
        match notification {
            Notification::Progress { session, .. } => {
                *session != self.session.load(Ordering::Acquire)
            }
            _ => false,
        }
    }

    /// Raw channel, for use in `crossbeam_channel::select!`.
    ///
    /// Messages taken from it directly must be checked with [`Self::is_stale`].
    pub fn receiver(&self) -> &Receiver<Notification> {
        &self.rx
    }

    /// Block until a current notification arrives.
    pub fn recv(&self) -> Result<Notification, RecvError> {
        loop {
            let n = self.rx.recv()?;
            if !self.is_stale(&n) {
                return Ok(n);
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let n = self.rx.recv_timeout(left)?;
            if !self.is_stale(&n) {
                return Ok(n);
            }
        }
    }

    pub fn try_recv(&self) -> Result<Notification, TryRecvError> {
        loop {
            let n = self.rx.try_recv()?;
            if !self.is_stale(&n) {
                return Ok(n);
            }
        }
    }

    /// Everything currently queued, stale progress removed.
    pub fn try_iter(&self) -> impl Iterator<Item = Notification> + '_ {
        self.rx.try_iter().filter(|n| !self.is_stale(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_engine_types::PlaybackState;

    fn progress(session: u64) -> Notification {
        Notification::Progress {
            session,
            position_secs: 1.0,
            duration_secs: 10.0,
        }
    }

    #[test]
    fn queued_progress_of_a_replaced_session_is_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let token = Arc::new(AtomicU64::new(1));
        let notifications = Notifications::new(rx, token.clone());

        tx.send(progress(1)).unwrap();
        tx.send(Notification::StateChanged {
            state: PlaybackState::Play,
        })
        .unwrap();
        token.store(2, Ordering::Release);
        tx.send(progress(2)).unwrap();

        let seen: Vec<_> = notifications.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                Notification::StateChanged {
                    state: PlaybackState::Play
                },
                progress(2)
            ]
        );
    }

    #[test]
    fn recv_skips_stale_progress() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let notifications = Notifications::new(rx, Arc::new(AtomicU64::new(5)));
        tx.send(progress(4)).unwrap();
        tx.send(progress(5)).unwrap();
        assert_eq!(notifications.recv().unwrap(), progress(5));
        assert!(notifications.try_recv().is_err());
        tx.send(progress(3)).unwrap();
        assert_eq!(
            notifications.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeoutError::Timeout)
        );
    }
}
