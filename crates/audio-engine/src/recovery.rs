//! Error recovery policy: reconnect radio, retry a bounded number of times,
//! then give up exactly once.

use audio_engine_types::TrackKind;

use crate::bus::StreamFault;

/// Decision for one stream error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Replay the same radio stream; never counted.
    Reconnect,
    /// Replay the same descriptor.
    Retry { attempt: u32 },
    /// Stop the session and surface `message` once.
    Fail { message: String },
}

#[derive(Debug)]
pub struct ErrorRecovery {
    threshold: u32,
    consecutive: u32,
    reconnects: u64,
}

impl ErrorRecovery {
    /// `threshold` is the number of consecutive errors that fails a session
    /// (clamped to at least 1).
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            reconnects: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// A play went through; consecutive errors start over.
    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn classify(&mut self, kind: TrackKind, fault: &StreamFault) -> Recovery {
        if kind == TrackKind::Radio && matches!(fault, StreamFault::SourceIdle(_)) {
            self.reconnects = self.reconnects.saturating_add(1);
            return Recovery::Reconnect;
        }
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive < self.threshold {
            Recovery::Retry {
                attempt: self.consecutive,
            }
        } else {
            Recovery::Fail {
                message: fault.message().to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> StreamFault {
        StreamFault::Transient("connection reset".to_string())
    }

    #[test]
    fn second_consecutive_error_fails_with_default_threshold() {
        let mut rec = ErrorRecovery::new(2);
        assert_eq!(
            rec.classify(TrackKind::Normal, &transient()),
            Recovery::Retry { attempt: 1 }
        );
        assert_eq!(
            rec.classify(TrackKind::Normal, &transient()),
            Recovery::Fail {
                message: "connection reset".to_string()
            }
        );
    }

    #[test]
    fn success_resets_counter() {
        let mut rec = ErrorRecovery::new(2);
        rec.classify(TrackKind::Normal, &transient());
        rec.on_success();
        assert_eq!(rec.consecutive(), 0);
        assert!(matches!(
            rec.classify(TrackKind::Normal, &transient()),
            Recovery::Retry { .. }
        ));
    }

    #[test]
    fn radio_idle_reconnects_forever_without_counting() {
        let mut rec = ErrorRecovery::new(2);
        for _ in 0..50 {
            assert_eq!(
                rec.classify(
                    TrackKind::Radio,
                    &StreamFault::SourceIdle("eof".to_string())
                ),
                Recovery::Reconnect
            );
        }
        assert_eq!(rec.consecutive(), 0);
        assert_eq!(rec.reconnects(), 50);
    }

    #[test]
    fn radio_transient_errors_still_count() {
        let mut rec = ErrorRecovery::new(2);
        rec.classify(TrackKind::Radio, &transient());
        assert!(matches!(
            rec.classify(TrackKind::Radio, &transient()),
            Recovery::Fail { .. }
        ));
    }

    #[test]
    fn idle_on_normal_track_is_transient() {
        let mut rec = ErrorRecovery::new(3);
        let idle = StreamFault::SourceIdle("closed".to_string());
        assert!(matches!(
            rec.classify(TrackKind::Normal, &idle),
            Recovery::Retry { attempt: 1 }
        ));
        assert!(matches!(
            rec.classify(TrackKind::Normal, &idle),
            Recovery::Retry { attempt: 2 }
        ));
        assert!(matches!(
            rec.classify(TrackKind::Normal, &idle),
            Recovery::Fail { .. }
        ));
    }

    #[test]
    fn zero_threshold_fails_immediately() {
        let mut rec = ErrorRecovery::new(0);
        assert!(matches!(
            rec.classify(TrackKind::Normal, &transient()),
            Recovery::Fail { .. }
        ));
    }
}
