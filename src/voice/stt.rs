//! Speech-to-text (STT) processing
//!
//! Engines follow the streaming recognizer model: PCM is fed in chunks,
//! the engine reports finished segments as JSON objects with a `text`
//! field, and a final result flushes whatever is left.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::clip::{AudioClip, BYTES_PER_SAMPLE, SAMPLE_RATE};
use crate::error::RecognitionFailure;
use crate::{Error, Result};

/// Bytes fed to the engine per call (4000 frames of 16-bit audio)
pub const DEFAULT_CHUNK_BYTES: usize = 8000;

/// An offline speech recognition engine
///
/// Engines are not reentrant; `SpeechRecognizer` serializes access.
pub trait RecognitionEngine: Send {
    /// Prepare for a new utterance at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be reset
    fn start(&mut self, sample_rate: u32) -> Result<()>;

    /// Feed a chunk of PCM; returns true when a segment has been finalized
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the audio
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool>;

    /// JSON result of the segment finalized by the last `accept_waveform`
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn result(&mut self) -> Result<String>;

    /// JSON result for the remaining audio, ending the utterance
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn final_result(&mut self) -> Result<String>;
}

/// Recognized text of one clip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    /// Create a transcript from text
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Recognized text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when no speech was recognized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl std::fmt::Display for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Engine result object
#[derive(Deserialize)]
struct EngineResult {
    #[serde(default)]
    text: String,
}

/// Extract the `text` field from an engine result
///
/// # Errors
///
/// Returns an engine failure if the result is not valid JSON
pub fn parse_result(json: &str) -> Result<String> {
    let result: EngineResult = serde_json::from_str(json)
        .map_err(|e| Error::recognition_engine(format!("malformed engine result: {e}")))?;
    Ok(result.text.trim().to_string())
}

/// Converts clips to transcripts over a shared engine
#[derive(Clone)]
pub struct SpeechRecognizer {
    engine: Arc<Mutex<Box<dyn RecognitionEngine>>>,
    chunk_bytes: usize,
}

impl SpeechRecognizer {
    /// Wrap an engine
    #[must_use]
    pub fn new(engine: Box<dyn RecognitionEngine>, chunk_bytes: usize) -> Self {
        // Keep chunks sample-aligned
        let chunk_bytes = (chunk_bytes.max(BYTES_PER_SAMPLE) / BYTES_PER_SAMPLE) * BYTES_PER_SAMPLE;
        Self {
            engine: Arc::new(Mutex::new(engine)),
            chunk_bytes,
        }
    }

    /// Transcribe a clip
    ///
    /// Empty engine output is a valid empty transcript.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty or misaligned clips, `EngineFailure`
    /// if the engine fails and `Cancelled` if the token fired before start
    pub async fn recognize(&self, clip: AudioClip, cancel: &CancellationToken) -> Result<Transcript> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        validate(&clip)?;

        let engine = Arc::clone(&self.engine);
        let chunk_bytes = self.chunk_bytes;

        let transcript = tokio::task::spawn_blocking(move || {
            let mut engine = engine
                .lock()
                .map_err(|_| Error::recognition_engine("engine lock poisoned"))?;
            run_engine(&mut **engine, &clip, chunk_bytes)
        })
        .await
        .map_err(|e| Error::recognition_engine(format!("recognition task failed: {e}")))??;

        if transcript.is_empty() {
            tracing::debug!("no speech recognized");
        } else {
            tracing::info!(transcript = %transcript, "transcription complete");
        }

        Ok(transcript)
    }
}

fn validate(clip: &AudioClip) -> Result<()> {
    if clip.is_empty() {
        return Err(Error::Recognition(RecognitionFailure::InvalidInput(
            "clip is empty".to_string(),
        )));
    }
    if clip.payload().len() % BYTES_PER_SAMPLE != 0 {
        return Err(Error::Recognition(RecognitionFailure::InvalidInput(
            "clip is not 16-bit aligned".to_string(),
        )));
    }
    Ok(())
}

fn run_engine(
    engine: &mut dyn RecognitionEngine,
    clip: &AudioClip,
    chunk_bytes: usize,
) -> Result<Transcript> {
    engine.start(SAMPLE_RATE).map_err(engine_error)?;

    let mut segments = Vec::new();
    for chunk in clip.payload().chunks(chunk_bytes) {
        if engine.accept_waveform(chunk).map_err(engine_error)? {
            let text = parse_result(&engine.result().map_err(engine_error)?)?;
            if !text.is_empty() {
                segments.push(text);
            }
        }
    }

    let text = parse_result(&engine.final_result().map_err(engine_error)?)?;
    if !text.is_empty() {
        segments.push(text);
    }

    Ok(Transcript::new(segments.join(" ")))
}

fn engine_error(e: Error) -> Error {
    match e {
        Error::Recognition(_) => e,
        other => Error::recognition_engine(other.to_string()),
    }
}
