//! Playback engine for a desktop audio player.
//!
//! [`Engine`] accepts play/pause/resume/stop/seek requests, drives a
//! reconfigurable graph (decode → convert → tee → volume → equalizer → output)
//! and reports progress through [`Notification`]s. Local files and HTTP
//! streams are both supported; endless radio streams reconnect on their own.

pub mod buffering;
pub mod bus;
pub mod config;
pub mod convert;
pub mod decode;
pub mod device;
pub mod engine;
pub mod equalizer;
pub mod error;
pub mod monitor;
pub mod net;
pub mod pipeline;
pub mod queue;
pub mod recorder;
pub mod recovery;
pub mod sink;
pub mod source;
pub mod status;
pub mod tee;

pub use audio_engine_types::{
    BufferingState, EngineStatus, Notification, PlaybackState, TrackDescriptor, TrackKind,
    TrackStatus,
};
pub use config::{EngineConfig, PlaybackConfig};
pub use engine::{Engine, Notifications};
pub use equalizer::BAND_COUNT;
pub use error::{EngineError, Result};
