//! Configuration management for the voice bot
//!
//! Values are resolved env > TOML file > defaults. Engines and stages are
//! built from a resolved `Config` at startup; any failure there is fatal.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use file::VoicebotConfigFile;

use crate::engines::{ProcessRecognizer, ProcessSynthesizer};
use crate::session::Pipeline;
use crate::voice::{
    AudioCaptureStage, AudioPlaybackStage, CaptureDevice, DEFAULT_CHUNK_BYTES, DEFAULT_FALLBACK,
    DEFAULT_FRAME_SIZE, RecognitionEngine, ResponsePolicy, SpeechRecognizer, SpeechSynthesizer,
    Transcoder, default_rules,
};
use crate::{Error, Result};

/// Default recognition model directory
pub const DEFAULT_MODEL_DIR: &str = "vosk-model-small-en-us-0.15";

/// Voice bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Microphone capture
    pub capture: CaptureConfig,

    /// Speech recognition
    pub recognizer: RecognizerConfig,

    /// Speech synthesis
    pub synthesizer: SynthesizerConfig,

    /// Playback timing
    pub playback: PlaybackConfig,

    /// Configured ffmpeg path, if any
    pub ffmpeg: Option<PathBuf>,

    /// Reply lookup
    pub replies: ResponsePolicy,

    /// Discord bot token
    pub discord_token: Option<String>,

    /// Path to data directory
    pub data_dir: PathBuf,
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Length of one recording
    pub duration: Duration,

    /// Samples read per frame
    pub frame_size: usize,

    /// Longest wait for a frame
    pub read_timeout: Duration,
}

/// Which recognition engine to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    /// External streaming program
    Process,
    /// whisper.cpp in process
    Whisper,
}

impl FromStr for RecognizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "process" | "vosk" => Ok(Self::Process),
            "whisper" => Ok(Self::Whisper),
            other => Err(Error::Config(format!("unknown recognizer engine '{other}'"))),
        }
    }
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub engine: RecognizerKind,
    pub model_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub chunk_bytes: usize,
    pub language: Option<String>,
    pub threads: i32,
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub voice_args: Vec<String>,

    /// Words per minute
    pub rate: u32,

    /// 0.0 to 1.0
    pub volume: f32,

    pub voice: Option<String>,

    /// Directory replies are rendered into
    pub staging_dir: PathBuf,
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub poll_interval: Duration,
    pub settle: Duration,
    pub grace: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            settle: Duration::from_millis(500),
            grace: Duration::from_secs(2),
        }
    }
}

/// Return the data directory: `~/.local/share/omni/voicebot`
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/voicebot"),
        |d| d.data_dir().join("omni").join("voicebot"),
    )
}

/// Parse an environment value, ignoring values that do not parse
fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// `config_path` replaces the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or any value
    /// is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok(), data_dir())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if any value is invalid
    pub fn from_sources<F>(fc: VoicebotConfigFile, env: F, data_dir: PathBuf) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Capture (env > toml > default)
        let duration_secs: f64 = parsed(&env, "VOICEBOT_CAPTURE_SECS")
            .or(fc.capture.duration_secs)
            .unwrap_or(5.0);
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(Error::Config(format!(
                "capture duration must be positive, got {duration_secs}"
            )));
        }
        let capture = CaptureConfig {
            duration: Duration::from_secs_f64(duration_secs),
            frame_size: fc.capture.frame_size.unwrap_or(DEFAULT_FRAME_SIZE).max(1),
            read_timeout: Duration::from_millis(fc.capture.read_timeout_ms.unwrap_or(2000)),
        };

        // Recognizer
        let engine = match env("VOICEBOT_RECOGNIZER").or(fc.recognizer.engine) {
            Some(name) => name.parse()?,
            None => RecognizerKind::Process,
        };
        let recognizer = RecognizerConfig {
            engine,
            model_dir: env("VOICEBOT_MODEL_DIR")
                .map(PathBuf::from)
                .or(fc.recognizer.model_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            program: env("VOICEBOT_STT_PROGRAM")
                .or(fc.recognizer.program)
                .unwrap_or_else(|| "vosk-stream".to_string()),
            args: fc
                .recognizer
                .args
                .unwrap_or_else(|| strings(&["--model", "{model}", "--rate", "{rate}"])),
            chunk_bytes: fc.recognizer.chunk_bytes.unwrap_or(DEFAULT_CHUNK_BYTES),
            language: fc.recognizer.language,
            threads: fc.recognizer.threads.unwrap_or(4),
        };

        // Synthesizer
        let volume: f32 = parsed(&env, "VOICEBOT_TTS_VOLUME")
            .or(fc.synthesizer.volume)
            .unwrap_or(1.0);
        if !(0.0..=1.0).contains(&volume) {
            return Err(Error::Config(format!(
                "synthesizer volume must be between 0.0 and 1.0, got {volume}"
            )));
        }
        let synthesizer = SynthesizerConfig {
            program: env("VOICEBOT_TTS_PROGRAM")
                .or(fc.synthesizer.program)
                .unwrap_or_else(|| "espeak-ng".to_string()),
            args: fc.synthesizer.args.unwrap_or_else(|| {
                strings(&["-s", "{rate}", "-a", "{amplitude}", "-w", "{output}", "{text}"])
            }),
            voice_args: fc
                .synthesizer
                .voice_args
                .unwrap_or_else(|| strings(&["-v", "{voice}"])),
            rate: parsed(&env, "VOICEBOT_TTS_RATE")
                .or(fc.synthesizer.rate)
                .unwrap_or(150),
            volume,
            voice: env("VOICEBOT_TTS_VOICE").or(fc.synthesizer.voice),
            staging_dir: env("VOICEBOT_STAGING_DIR")
                .map(PathBuf::from)
                .or(fc.synthesizer.staging_dir)
                .unwrap_or_else(|| data_dir.join("staging")),
        };

        let defaults = PlaybackConfig::default();
        let playback = PlaybackConfig {
            poll_interval: fc
                .playback
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            settle: fc
                .playback
                .settle_ms
                .map_or(defaults.settle, Duration::from_millis),
            grace: fc
                .playback
                .grace_ms
                .map_or(defaults.grace, Duration::from_millis),
        };

        let replies = ResponsePolicy::new(
            fc.replies.rules.unwrap_or_else(default_rules),
            fc.replies.fallback.as_deref().unwrap_or(DEFAULT_FALLBACK),
        );

        Ok(Self {
            capture,
            recognizer,
            synthesizer,
            playback,
            ffmpeg: env("VOICEBOT_FFMPEG")
                .map(PathBuf::from)
                .or(fc.transcoder.ffmpeg),
            replies,
            discord_token: env("DISCORD_TOKEN").or(fc.discord.token),
            data_dir,
        })
    }

    /// Load the configured recognition engine
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the model or program is missing
    pub fn recognition_engine(&self) -> Result<Box<dyn RecognitionEngine>> {
        let r = &self.recognizer;
        match r.engine {
            RecognizerKind::Process => Ok(Box::new(ProcessRecognizer::new(
                &r.program,
                r.args.clone(),
                &r.model_dir,
            )?)),
            #[cfg(feature = "whisper")]
            RecognizerKind::Whisper => Ok(Box::new(crate::engines::WhisperRecognizer::new(
                &r.model_dir,
                r.language.clone(),
                r.threads,
            )?)),
            #[cfg(not(feature = "whisper"))]
            RecognizerKind::Whisper => Err(Error::Config(
                "whisper recognizer requested but the `whisper` feature is not enabled"
                    .to_string(),
            )),
        }
    }

    /// Start the synthesis worker
    ///
    /// # Errors
    ///
    /// Returns error if the program is missing or the staging directory
    /// cannot be created
    pub fn speech_synthesizer(&self) -> Result<SpeechSynthesizer> {
        let s = &self.synthesizer;
        let engine = ProcessSynthesizer::new(
            &s.program,
            s.args.clone(),
            s.voice_args.clone(),
            s.rate,
            s.volume,
            s.voice.clone(),
        )?;
        SpeechSynthesizer::spawn(Box::new(engine), s.staging_dir.clone())
    }

    /// Playback stage with the configured timing
    #[must_use]
    pub fn playback_stage(&self) -> AudioPlaybackStage {
        AudioPlaybackStage::new(
            self.playback.poll_interval,
            self.playback.settle,
            self.playback.grace,
        )
    }

    /// Resolve the media transcoder
    ///
    /// # Errors
    ///
    /// Returns a configuration error if ffmpeg cannot be found
    pub fn transcoder(&self) -> Result<Transcoder> {
        Transcoder::resolve(self.ffmpeg.as_deref())
    }

    /// Build the full pipeline around a capture device
    ///
    /// # Errors
    ///
    /// Returns error if any engine fails to load
    pub fn pipeline(&self, device: Arc<dyn CaptureDevice>) -> Result<Pipeline> {
        let recognizer =
            SpeechRecognizer::new(self.recognition_engine()?, self.recognizer.chunk_bytes);
        let synthesizer = self.speech_synthesizer()?;

        Ok(Pipeline::new(
            AudioCaptureStage::new(device, self.capture.frame_size),
            recognizer,
            self.replies.clone(),
            synthesizer,
            self.playback_stage(),
            self.capture.duration,
        ))
    }
}
