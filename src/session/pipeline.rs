//! One listen cycle: capture, recognize, resolve, synthesize, play

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::voice::{
    AudioCaptureStage, AudioPlaybackStage, ResponsePolicy, SAMPLE_RATE, SpeechRecognizer,
    SpeechSynthesizer, Transcript, VoiceConnection,
};

/// Outcome of a successful listen cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    /// What was heard
    pub transcript: Transcript,

    /// What was said back; `None` when nothing was recognized
    pub reply: Option<String>,
}

/// The stages a listen cycle runs through, in order
///
/// Engines inside the recognizer and synthesizer are shared by every
/// session; capture and playback only touch per-call state.
#[derive(Clone)]
pub struct Pipeline {
    capture: AudioCaptureStage,
    recognizer: SpeechRecognizer,
    policy: Arc<ResponsePolicy>,
    synthesizer: SpeechSynthesizer,
    playback: AudioPlaybackStage,
    capture_duration: Duration,
}

impl Pipeline {
    /// Assemble a pipeline from its stages
    #[must_use]
    pub fn new(
        capture: AudioCaptureStage,
        recognizer: SpeechRecognizer,
        policy: ResponsePolicy,
        synthesizer: SpeechSynthesizer,
        playback: AudioPlaybackStage,
        capture_duration: Duration,
    ) -> Self {
        Self {
            capture,
            recognizer,
            policy: Arc::new(policy),
            synthesizer,
            playback,
            capture_duration,
        }
    }

    /// Reply lookup used by this pipeline
    #[must_use]
    pub fn policy(&self) -> &ResponsePolicy {
        &self.policy
    }

    /// Playback stage used by this pipeline
    #[must_use]
    pub const fn playback(&self) -> &AudioPlaybackStage {
        &self.playback
    }

    /// Run the stages strictly in sequence for `guild_id`
    ///
    /// The first failing stage aborts the cycle.
    ///
    /// # Errors
    ///
    /// Returns the failing stage's error, or `Cancelled` once `cancel` fires
    pub async fn run(
        &self,
        guild_id: u64,
        connection: &dyn VoiceConnection,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        tracing::debug!(guild_id, secs = self.capture_duration.as_secs_f32(), "capturing");
        let clip = self
            .capture
            .capture(self.capture_duration, SAMPLE_RATE, cancel)
            .await?;

        let transcript = self.recognizer.recognize(clip, cancel).await?;
        if transcript.is_empty() {
            return Ok(PipelineResult {
                transcript,
                reply: None,
            });
        }

        let reply = self.policy.resolve(&transcript).to_string();
        tracing::info!(guild_id, transcript = %transcript, reply = %reply, "reply chosen");

        let speech = self.synthesizer.synthesize(&reply, guild_id, cancel).await?;
        self.playback.play(connection, speech, cancel).await?;

        Ok(PipelineResult {
            transcript,
            reply: Some(reply),
        })
    }
}
