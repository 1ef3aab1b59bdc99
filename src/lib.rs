//! Beacon Voicebot - spoken replies in chat voice channels
//!
//! A session joins a guild's voice channel and, on each listen command,
//! records a short utterance, transcribes it, picks a keyword reply,
//! synthesizes that reply and plays it back into the channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Gateways                          │
//! │          Console        │        Discord             │
//! └────────────────────┬────────────────────────────────┘
//!                      │ join / leave / listen
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionManager                       │
//! │   one VoiceSession per guild, cancel token per run   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Pipeline                          │
//! │  Capture → STT → Reply → TTS → Playback              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod config;
pub mod engines;
pub mod error;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use session::{JoinAck, Pipeline, PipelineResult, SessionManager, SessionState};
