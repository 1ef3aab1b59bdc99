//! In-process recognition with whisper.cpp

use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::voice::{BYTES_PER_SAMPLE, RecognitionEngine, SAMPLE_RATE};
use crate::{Error, Result};

/// Recognizer backed by a whisper.cpp model file
///
/// Whisper is not a streaming engine; audio is buffered and transcribed
/// when the final result is requested.
pub struct WhisperRecognizer {
    context: WhisperContext,
    language: Option<String>,
    n_threads: i32,
    buffer: Vec<f32>,
}

impl WhisperRecognizer {
    /// Load a model
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the model cannot be loaded
    pub fn new(model_path: &Path, language: Option<String>, n_threads: i32) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::Config(format!(
                "recognition model not found: {}",
                model_path.display()
            )));
        }

        let path = model_path
            .to_str()
            .ok_or_else(|| Error::Config("invalid model path".to_string()))?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| Error::Config(format!("failed to load whisper model: {e:?}")))?;

        tracing::info!(model = %model_path.display(), "whisper model loaded");

        Ok(Self {
            context,
            language,
            n_threads,
            buffer: Vec::new(),
        })
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn start(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate != SAMPLE_RATE {
            return Err(Error::recognition_engine(format!(
                "whisper needs {SAMPLE_RATE} Hz audio, got {sample_rate}"
            )));
        }
        self.buffer.clear();
        Ok(())
    }

    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool> {
        self.buffer.extend(
            pcm.chunks_exact(BYTES_PER_SAMPLE)
                .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0),
        );
        Ok(false)
    }

    fn result(&mut self) -> Result<String> {
        Ok(r#"{"text": ""}"#.to_string())
    }

    fn final_result(&mut self) -> Result<String> {
        let samples = std::mem::take(&mut self.buffer);

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        if let Some(ref lang) = self.language {
            params.set_language(Some(lang));
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| Error::recognition_engine(format!("failed to create state: {e:?}")))?;
        state
            .full(params, &samples)
            .map_err(|e| Error::recognition_engine(format!("transcription failed: {e:?}")))?;

        let segments = state
            .full_n_segments()
            .map_err(|e| Error::recognition_engine(format!("failed to get segments: {e:?}")))?;

        let mut text = String::new();
        for i in 0..segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                Error::recognition_engine(format!("failed to get segment text: {e:?}"))
            })?;
            text.push_str(&segment);
        }

        Ok(serde_json::json!({ "text": text.trim() }).to_string())
    }
}
