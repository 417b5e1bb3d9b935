//! Message bus from the running graph to the control loop.
//!
//! Stage threads never touch engine state. They post [`BusMessage`]s through a
//! [`Bus`] stamped with the session token that built them; the control loop
//! drops anything whose token is no longer current.

use crossbeam_channel::Sender;

use crate::engine::ControlMsg;

/// Failure reported by a running stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFault {
    /// A network source with no known length closed or dropped after audio
    /// started flowing (the idle "ready → null" transition).
    SourceIdle(String),
    /// Any other runtime failure of the stream.
    Transient(String),
}

impl StreamFault {
    pub fn message(&self) -> &str {
        match self {
            Self::SourceIdle(m) | Self::Transient(m) => m,
        }
    }
}

/// Asynchronous message emitted by the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum BusMessage {
    /// Read-ahead fill level, 0..=100.
    Buffering(u8),
    /// Title from container tags or stream metadata.
    Tag { title: String },
    /// Physical duration of the resource, in seconds.
    DurationKnown(f64),
    EndOfStream,
    Error(StreamFault),
}

/// A bus message tagged with the session that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct BusEvent {
    pub session: u64,
    pub message: BusMessage,
}

/// Posting handle given to a graph when it is built for a session.
#[derive(Clone)]
pub struct Bus {
    session: u64,
    tx: Sender<ControlMsg>,
}

impl Bus {
    pub(crate) fn new(session: u64, tx: Sender<ControlMsg>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Post a message; silently dropped once the engine is gone.
    pub fn post(&self, message: BusMessage) {
        let _ = self.tx.send(ControlMsg::Bus(BusEvent {
            session: self.session,
            message,
        }));
    }

    pub fn buffering(&self, percent: u8) {
        self.post(BusMessage::Buffering(percent.min(100)));
    }

    pub fn error(&self, fault: StreamFault) {
        self.post(BusMessage::Error(fault));
    }
}

#[cfg(test)]
pub(crate) fn test_bus(session: u64) -> (Bus, crossbeam_channel::Receiver<ControlMsg>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Bus::new(session, tx), rx)
}
