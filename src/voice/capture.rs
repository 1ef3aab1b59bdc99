//! Fixed-duration audio capture from the input device

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::clip::{AudioClip, BYTES_PER_SAMPLE, SAMPLE_RATE, resample};
use crate::{Error, Result};

/// Samples read per frame (matches the device buffer size)
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// An audio input source
///
/// Implementations hand out one handle per capture call. The handle is used
/// from a single blocking thread and never shared.
pub trait CaptureDevice: Send + Sync {
    /// Open an input handle producing mono 16-bit PCM at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or busy
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputHandle>>;
}

/// An open capture handle
pub trait InputHandle {
    /// Block until `frames` samples are available and return them as PCM bytes
    ///
    /// # Errors
    ///
    /// Returns error if the device reports a failure or stalls
    fn read(&mut self, frames: usize) -> Result<Vec<u8>>;

    /// Release the device
    fn close(&mut self);
}

/// Closes the handle on every exit path
struct OpenHandle(Box<dyn InputHandle>);

impl Drop for OpenHandle {
    fn drop(&mut self) {
        self.0.close();
        tracing::debug!("capture handle closed");
    }
}

/// Records fixed-duration clips
#[derive(Clone)]
pub struct AudioCaptureStage {
    device: Arc<dyn CaptureDevice>,
    frame_size: usize,
}

impl AudioCaptureStage {
    /// Create a capture stage over a device
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>, frame_size: usize) -> Self {
        Self {
            device,
            frame_size: frame_size.max(1),
        }
    }

    /// Record `duration` of audio at `sample_rate`
    ///
    /// Runs the read loop on a blocking thread. The cancel token is checked
    /// before every frame; a cancelled capture discards what it has read.
    ///
    /// # Errors
    ///
    /// Returns `Capture` on any device failure, `Cancelled` if the token fires
    pub async fn capture(
        &self,
        duration: Duration,
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<AudioClip> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let device = Arc::clone(&self.device);
        let frame_size = self.frame_size;
        let cancel = cancel.clone();

        let clip = tokio::task::spawn_blocking(move || {
            record_blocking(device.as_ref(), duration, sample_rate, frame_size, &cancel)
        })
        .await
        .map_err(|e| Error::Capture(format!("capture task failed: {e}")))??;

        Ok(clip)
    }
}

fn record_blocking(
    device: &dyn CaptureDevice,
    duration: Duration,
    sample_rate: u32,
    frame_size: usize,
    cancel: &CancellationToken,
) -> Result<AudioClip> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total_samples = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
    let total_bytes = total_samples * BYTES_PER_SAMPLE;

    let mut handle = OpenHandle(device.open_input(sample_rate).map_err(capture_error)?);
    tracing::debug!(sample_rate, total_samples, "recording");

    let mut payload = Vec::with_capacity(total_bytes);
    while payload.len() < total_bytes {
        if cancel.is_cancelled() {
            tracing::debug!(read = payload.len(), "capture cancelled");
            return Err(Error::Cancelled);
        }

        let remaining = (total_bytes - payload.len()) / BYTES_PER_SAMPLE;
        let frame = handle.0.read(frame_size.min(remaining)).map_err(capture_error)?;
        if frame.is_empty() {
            return Err(Error::Capture("input returned no data".to_string()));
        }
        payload.extend_from_slice(&frame);
    }
    payload.truncate(total_bytes);
    drop(handle);

    tracing::debug!(bytes = payload.len(), "finished recording");

    if sample_rate == SAMPLE_RATE {
        return Ok(AudioClip::from_pcm(payload));
    }

    let samples: Vec<f32> = payload
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect();
    let samples = resample(&samples, sample_rate, SAMPLE_RATE)?;
    Ok(AudioClip::from_f32(&samples))
}

fn capture_error(e: Error) -> Error {
    match e {
        Error::Capture(_) | Error::Cancelled => e,
        other => Error::Capture(other.to_string()),
    }
}

#[cfg(feature = "audio-io")]
pub use cpal_input::CpalCaptureDevice;

#[cfg(feature = "audio-io")]
mod cpal_input {
    use std::sync::mpsc;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, Stream, StreamConfig};

    use super::{CaptureDevice, InputHandle};
    use crate::{Error, Result};

    enum Chunk {
        Samples(Vec<f32>),
        Failed(String),
    }

    /// Captures from the default input device
    pub struct CpalCaptureDevice {
        read_timeout: Duration,
    }

    impl CpalCaptureDevice {
        /// Create a capture device
        ///
        /// # Errors
        ///
        /// Returns error if no input device is available
        pub fn new(read_timeout: Duration) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                "audio input available"
            );

            Ok(Self { read_timeout })
        }
    }

    impl CaptureDevice for CpalCaptureDevice {
        fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputHandle>> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Capture("no input device".to_string()))?;

            let supported_config = device
                .supported_input_configs()
                .map_err(|e| Error::Capture(e.to_string()))?
                .find(|c| {
                    c.channels() == 1
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
                .ok_or_else(|| Error::Capture("no suitable audio config found".to_string()))?;

            let config: StreamConfig = supported_config
                .with_sample_rate(SampleRate(sample_rate))
                .config();

            let (tx, rx) = mpsc::channel();
            let err_tx = tx.clone();

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let _ = tx.send(Chunk::Samples(data.to_vec()));
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio capture error");
                        let _ = err_tx.send(Chunk::Failed(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| Error::Capture(e.to_string()))?;

            stream.play().map_err(|e| Error::Capture(e.to_string()))?;
            tracing::debug!(sample_rate, "audio capture started");

            Ok(Box::new(CpalInput {
                stream: Some(stream),
                rx,
                pending: Vec::new(),
                read_timeout: self.read_timeout,
            }))
        }
    }

    struct CpalInput {
        stream: Option<Stream>,
        rx: mpsc::Receiver<Chunk>,
        pending: Vec<f32>,
        read_timeout: Duration,
    }

    impl InputHandle for CpalInput {
        fn read(&mut self, frames: usize) -> Result<Vec<u8>> {
            while self.pending.len() < frames {
                match self.rx.recv_timeout(self.read_timeout) {
                    Ok(Chunk::Samples(samples)) => self.pending.extend_from_slice(&samples),
                    Ok(Chunk::Failed(reason)) => return Err(Error::Capture(reason)),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        return Err(Error::Capture("audio input stalled".to_string()));
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(Error::Capture("audio input closed".to_string()));
                    }
                }
            }

            let frame: Vec<f32> = self.pending.drain(..frames).collect();
            #[allow(clippy::cast_possible_truncation)]
            let bytes = frame
                .iter()
                .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                .flat_map(i16::to_le_bytes)
                .collect();
            Ok(bytes)
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                tracing::debug!("audio capture stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Device producing a constant tone, optionally failing after some reads
    struct ToneDevice {
        fail_after: Option<usize>,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl ToneDevice {
        fn new(fail_after: Option<usize>) -> Self {
            Self {
                fail_after,
                opened: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ToneInput {
        reads: usize,
        fail_after: Option<usize>,
        closed: Arc<AtomicUsize>,
    }

    impl CaptureDevice for ToneDevice {
        fn open_input(&self, _sample_rate: u32) -> Result<Box<dyn InputHandle>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ToneInput {
                reads: 0,
                fail_after: self.fail_after,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    impl InputHandle for ToneInput {
        fn read(&mut self, frames: usize) -> Result<Vec<u8>> {
            if self.fail_after.is_some_and(|n| self.reads >= n) {
                return Err(Error::Audio("overflow".to_string()));
            }
            self.reads += 1;
            Ok(vec![1; frames * BYTES_PER_SAMPLE])
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_capture_exact_length() {
        let device = Arc::new(ToneDevice::new(None));
        let stage = AudioCaptureStage::new(device.clone(), 1024);

        let clip = stage
            .capture(Duration::from_millis(250), SAMPLE_RATE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(clip.sample_count(), 4000);
        assert_eq!(device.opened.load(Ordering::SeqCst), 1);
        assert_eq!(device.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_error_is_fatal_and_releases_device() {
        let device = Arc::new(ToneDevice::new(Some(2)));
        let stage = AudioCaptureStage::new(device.clone(), 1024);

        let err = stage
            .capture(Duration::from_secs(1), SAMPLE_RATE, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Capture(ref r) if r.contains("overflow")));
        assert_eq!(device.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let device = Arc::new(ToneDevice::new(None));
        let stage = AudioCaptureStage::new(device.clone(), 1024);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stage
            .capture(Duration::from_secs(1), SAMPLE_RATE, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(device.opened.load(Ordering::SeqCst), 0);
    }
}
