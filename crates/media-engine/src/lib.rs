//! Playback engine driving an external line-oriented decoder process.

mod broadcaster;
pub mod config;
mod dispatcher;
pub mod engine;
mod interpreter;
pub mod playlist;
pub mod protocol;
mod session;
pub mod supervisor;

#[cfg(test)]
mod fake_decoder;

pub use config::{DecoderConfig, EngineConfig};
pub use engine::{EngineHandle, MountResolver, PlaybackEngine, StatusSink};
pub use session::PlaybackState;
