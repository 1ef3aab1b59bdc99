//! Text-to-speech (TTS) processing
//!
//! The engine is not reentrant, so one worker thread owns it and serves
//! every session from a single queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::clip::AudioClip;
use crate::error::SynthesisFailure;
use crate::{Error, Result};

/// Pending jobs before callers start waiting to enqueue
const QUEUE_DEPTH: usize = 32;

/// An offline speech synthesis engine
pub trait SynthesisEngine: Send {
    /// Render `text` as a WAV file at `target`
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn render(&mut self, text: &str, target: &Path) -> Result<()>;
}

struct Job {
    text: String,
    target: PathBuf,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle to the synthesis worker
#[derive(Clone)]
pub struct SpeechSynthesizer {
    jobs: mpsc::Sender<Job>,
    staging_dir: PathBuf,
    next_job: Arc<AtomicU64>,
}

/// Removes a staged file when the request that owns it ends
struct Staged(PathBuf);

impl Drop for Staged {
    fn drop(&mut self) {
        discard(&self.0);
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "staged reply not removed"),
    }
}

impl SpeechSynthesizer {
    /// Start the worker thread that owns `engine`
    ///
    /// Staged files are written under `staging_dir`, one per request.
    ///
    /// # Errors
    ///
    /// Returns error if the staging directory cannot be created or the
    /// worker thread cannot be spawned
    pub fn spawn(engine: Box<dyn SynthesisEngine>, staging_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&staging_dir)?;

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("tts-worker".to_string())
            .spawn(move || worker(engine, rx))?;

        tracing::debug!(staging_dir = %staging_dir.display(), "synthesis worker started");

        Ok(Self {
            jobs: tx,
            staging_dir,
            next_job: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Fresh staging path for one request of `session_key`
    fn staging_path(&self, session_key: u64) -> PathBuf {
        let job = self.next_job.fetch_add(1, Ordering::Relaxed);
        self.staging_dir.join(format!("reply-{session_key}-{job}.wav"))
    }

    /// Render `text` to a clip
    ///
    /// Waits for the worker's queue; the call only succeeds if the engine
    /// produced non-empty audio. The staged file is gone once this returns,
    /// or once the worker finishes a render nobody is waiting for.
    ///
    /// # Errors
    ///
    /// Returns `EmptyOutput` for empty text or empty audio, `EngineFailure`
    /// if the engine fails and `Cancelled` if the token fires first
    pub async fn synthesize(
        &self,
        text: &str,
        session_key: u64,
        cancel: &CancellationToken,
    ) -> Result<AudioClip> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if text.trim().is_empty() {
            return Err(Error::Synthesis(SynthesisFailure::EmptyOutput));
        }

        let staged = Staged(self.staging_path(session_key));
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            text: text.to_string(),
            target: staged.0.clone(),
            reply: reply_tx,
        };

        tokio::select! {
            sent = self.jobs.send(job) => {
                sent.map_err(|_| Error::synthesis_engine("synthesis worker stopped"))?;
            }
            () = cancel.cancelled() => return Err(Error::Cancelled),
        }

        let rendered = tokio::select! {
            rendered = reply_rx => rendered
                .map_err(|_| Error::synthesis_engine("synthesis worker dropped the job"))?,
            () = cancel.cancelled() => return Err(Error::Cancelled),
        };
        rendered?;

        let clip = load_staged(&staged.0).await;
        drop(staged);
        let clip = clip?;

        tracing::debug!(bytes = clip.payload().len(), "speech synthesized");
        Ok(clip)
    }
}

async fn load_staged(target: &Path) -> Result<AudioClip> {
    let size = match tokio::fs::metadata(target).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(Error::synthesis_engine(e.to_string())),
    };
    if size == 0 {
        return Err(Error::Synthesis(SynthesisFailure::EmptyOutput));
    }

    let path = target.to_path_buf();
    let clip = tokio::task::spawn_blocking(move || AudioClip::read_wav(&path))
        .await
        .map_err(|e| Error::synthesis_engine(e.to_string()))?
        .map_err(|e| Error::synthesis_engine(format!("unreadable engine output: {e}")))?;

    if clip.is_empty() {
        return Err(Error::Synthesis(SynthesisFailure::EmptyOutput));
    }
    Ok(clip)
}

fn worker(mut engine: Box<dyn SynthesisEngine>, mut jobs: mpsc::Receiver<Job>) {
    while let Some(job) = jobs.blocking_recv() {
        // Caller gave up while queued
        if job.reply.is_closed() {
            continue;
        }

        // Only what this render writes may be read back
        discard(&job.target);

        tracing::debug!(chars = job.text.len(), "rendering speech");
        let result = engine.render(&job.text, &job.target).map_err(|e| match e {
            Error::Synthesis(_) => e,
            other => Error::synthesis_engine(other.to_string()),
        });

        if let Err(ref e) = result {
            tracing::warn!(error = %e, "speech synthesis failed");
        }
        if job.reply.send(result).is_err() {
            tracing::debug!(path = %job.target.display(), "caller gone, dropping render");
            discard(&job.target);
        }
    }

    tracing::debug!("synthesis worker stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct SilentWav;

    impl SynthesisEngine for SilentWav {
        fn render(&mut self, _text: &str, target: &Path) -> Result<()> {
            let clip = AudioClip::from_i16(&[0; 1600]);
            std::fs::write(target, clip.to_wav()?)?;
            Ok(())
        }
    }

    struct NoOutput;

    impl SynthesisEngine for NoOutput {
        fn render(&mut self, _text: &str, target: &Path) -> Result<()> {
            std::fs::write(target, b"")?;
            Ok(())
        }
    }

    /// Writes audio slowly on the first render, nothing on later ones
    struct SlowThenSilent {
        renders: usize,
    }

    impl SynthesisEngine for SlowThenSilent {
        fn render(&mut self, _text: &str, target: &Path) -> Result<()> {
            self.renders += 1;
            if self.renders == 1 {
                std::thread::sleep(Duration::from_millis(200));
                std::fs::write(target, AudioClip::from_i16(&[100; 1600]).to_wav()?)?;
            }
            Ok(())
        }
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_synthesize_removes_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let tts = SpeechSynthesizer::spawn(Box::new(SilentWav), dir.path().to_path_buf()).unwrap();

        let clip = tts
            .synthesize("Hello!", 7, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clip.sample_count(), 1600);
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn test_cancelled_render_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let tts = SpeechSynthesizer::spawn(
            Box::new(SlowThenSilent { renders: 0 }),
            dir.path().to_path_buf(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = tts.synthesize("Hello!", 1, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        // The next job only runs after the abandoned render finished, and
        // must not see its audio
        let err = tts
            .synthesize("Hello!", 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Synthesis(SynthesisFailure::EmptyOutput)));
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tts = SpeechSynthesizer::spawn(Box::new(SilentWav), dir.path().to_path_buf()).unwrap();

        let err = tts
            .synthesize("  ", 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Synthesis(SynthesisFailure::EmptyOutput)));
    }

    #[tokio::test]
    async fn test_zero_length_output_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tts = SpeechSynthesizer::spawn(Box::new(NoOutput), dir.path().to_path_buf()).unwrap();

        let err = tts
            .synthesize("Hello!", 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Synthesis(SynthesisFailure::EmptyOutput)));
    }

    #[test]
    fn test_staging_paths_are_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let tts = SpeechSynthesizer::spawn(Box::new(SilentWav), dir.path().to_path_buf()).unwrap();
        assert_ne!(tts.staging_path(1), tts.staging_path(2));
        assert_ne!(tts.staging_path(1), tts.staging_path(1));
    }
}
