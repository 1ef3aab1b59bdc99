//! Voice pipeline stages
//!
//! Capture, recognition, reply lookup, synthesis and playback. Each stage
//! takes the session's cancel token and returns typed errors; sequencing
//! lives in `session::pipeline`.

mod capture;
mod clip;
mod playback;
mod policy;
mod stt;
mod transcode;
mod tts;

#[cfg(feature = "audio-io")]
pub use capture::CpalCaptureDevice;
pub use capture::{AudioCaptureStage, CaptureDevice, DEFAULT_FRAME_SIZE, InputHandle};
pub use clip::{AudioClip, BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE, downmix, resample};
pub use playback::{AudioPlaybackStage, VoiceChannel, VoiceConnection, VoiceConnector};
pub use policy::{DEFAULT_FALLBACK, ReplyRule, ResponsePolicy, default_rules};
pub use stt::{DEFAULT_CHUNK_BYTES, RecognitionEngine, SpeechRecognizer, Transcript, parse_result};
pub use transcode::Transcoder;
pub use tts::{SpeechSynthesizer, SynthesisEngine};
