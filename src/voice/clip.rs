//! In-memory audio clips passed between pipeline stages

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{Error, Result};

/// Sample rate every clip is carried at (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Clips are mono
pub const CHANNELS: u16 = 1;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Frames handed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Mono 16kHz signed 16-bit little-endian PCM
///
/// Immutable once built. Stages hand clips on by value.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip {
    payload: Vec<u8>,
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("sample_rate", &SAMPLE_RATE)
            .field("channels", &CHANNELS)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

impl AudioClip {
    /// Wrap raw PCM bytes
    #[must_use]
    pub const fn from_pcm(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Build a clip from i16 samples
    #[must_use]
    pub fn from_i16(samples: &[i16]) -> Self {
        let payload = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { payload }
    }

    /// Build a clip from f32 samples in [-1.0, 1.0]
    #[must_use]
    pub fn from_f32(samples: &[f32]) -> Self {
        let samples: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        Self::from_i16(&samples)
    }

    /// Raw PCM bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the raw PCM bytes
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        CHANNELS
    }

    /// True when the clip holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Number of samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.payload.len() / BYTES_PER_SAMPLE
    }

    /// Play time of the clip
    #[must_use]
    pub fn duration(&self) -> Duration {
        let millis = self.sample_count() as u64 * 1000 / u64::from(SAMPLE_RATE);
        Duration::from_millis(millis)
    }

    /// Decode the payload as i16 samples
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.payload
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Decode the payload as f32 samples in [-1.0, 1.0]
    #[must_use]
    pub fn samples_f32(&self) -> Vec<f32> {
        self.samples()
            .into_iter()
            .map(|s| f32::from(s) / 32768.0)
            .collect()
    }

    /// Encode as a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;

            for sample in self.samples() {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }

    /// Decode WAV bytes of any rate and channel count into a clip
    ///
    /// Multi-channel audio is averaged down to mono and resampled to 16kHz.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a readable WAV file
    pub fn from_wav(bytes: &[u8]) -> Result<Self> {
        let reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
        decode_reader(reader)
    }

    /// Read and decode a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or decoded
    pub fn read_wav(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::Audio(other.to_string()),
        })?;
        decode_reader(reader)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_reader<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<AudioClip> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    let mono = downmix(&interleaved, usize::from(spec.channels.max(1)));
    let mono = if spec.sample_rate == SAMPLE_RATE {
        mono
    } else {
        resample(&mono, spec.sample_rate, SAMPLE_RATE)?
    };

    Ok(AudioClip::from_f32(&mono))
}

/// Average interleaved frames down to one channel
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio between rates
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 {
        return Err(Error::Audio("source sample rate is zero".to_string()));
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&out[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler
            .process_partial(Some(&[rest][..]), None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the resampler's internal delay
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let start = delay.min(output.len());
    let mut trimmed = output.split_off(start);
    trimmed.truncate(expected);
    Ok(trimmed)
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
