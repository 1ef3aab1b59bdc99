//! Concrete recognition and synthesis engines

mod process;
#[cfg(feature = "whisper")]
mod whisper;

pub use process::{ProcessRecognizer, ProcessSynthesizer, expand};
#[cfg(feature = "whisper")]
pub use whisper::WhisperRecognizer;
