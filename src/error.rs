//! Error types for the voice bot

use thiserror::Error;

/// Result type alias for voice bot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running voice sessions
#[derive(Debug, Error)]
pub enum Error {
    /// Requesting user is not in a voice channel
    #[error("user is not in a voice channel")]
    NoChannel,

    /// No session for the guild, or the session is not in the expected state
    #[error("not connected")]
    NotConnected,

    /// Audio capture failed
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech recognition failed
    #[error("recognition error: {0}")]
    Recognition(RecognitionFailure),

    /// Speech synthesis failed
    #[error("synthesis error: {0}")]
    Synthesis(SynthesisFailure),

    /// Playback over the voice connection failed
    #[error("playback error: {0}")]
    Playback(String),

    /// The listen cycle was cancelled (leave or rejoin)
    #[error("cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio format or device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Chat platform error
    #[error("channel error: {0}")]
    Channel(String),

    /// A background task died
    #[error("task error: {0}")]
    Task(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why recognition failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionFailure {
    /// Clip was empty or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The engine reported a failure
    #[error("engine failure: {0}")]
    EngineFailure(String),
}

/// Why synthesis failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisFailure {
    /// Nothing to speak, or the engine produced no audio
    #[error("empty output")]
    EmptyOutput,

    /// The engine reported a failure
    #[error("engine failure: {0}")]
    EngineFailure(String),
}

/// Copyable error discriminant for gateways rendering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoChannel,
    NotConnected,
    Capture,
    RecognitionInvalidInput,
    RecognitionEngine,
    SynthesisEmptyOutput,
    SynthesisEngine,
    Playback,
    Cancelled,
    Internal,
}

impl Error {
    /// Shorthand for a recognition engine failure
    #[must_use]
    pub fn recognition_engine(message: impl Into<String>) -> Self {
        Self::Recognition(RecognitionFailure::EngineFailure(message.into()))
    }

    /// Shorthand for a synthesis engine failure
    #[must_use]
    pub fn synthesis_engine(message: impl Into<String>) -> Self {
        Self::Synthesis(SynthesisFailure::EngineFailure(message.into()))
    }

    /// Discriminant of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoChannel => ErrorKind::NoChannel,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Capture(_) => ErrorKind::Capture,
            Self::Recognition(RecognitionFailure::InvalidInput(_)) => {
                ErrorKind::RecognitionInvalidInput
            }
            Self::Recognition(RecognitionFailure::EngineFailure(_)) => {
                ErrorKind::RecognitionEngine
            }
            Self::Synthesis(SynthesisFailure::EmptyOutput) => ErrorKind::SynthesisEmptyOutput,
            Self::Synthesis(SynthesisFailure::EngineFailure(_)) => ErrorKind::SynthesisEngine,
            Self::Playback(_) => ErrorKind::Playback,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_)
            | Self::Audio(_)
            | Self::Channel(_)
            | Self::Task(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Short text suitable for showing to the user who issued the command
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NoChannel => "Join a voice channel first!",
            ErrorKind::NotConnected => "I'm not in a voice channel!",
            ErrorKind::Capture => "Failed to record audio!",
            ErrorKind::RecognitionInvalidInput | ErrorKind::RecognitionEngine => {
                "I couldn't understand that!"
            }
            ErrorKind::SynthesisEmptyOutput | ErrorKind::SynthesisEngine => {
                "Failed to generate speech!"
            }
            ErrorKind::Playback => "Failed to play the reply.",
            ErrorKind::Cancelled => "Listening was interrupted.",
            ErrorKind::Internal => "An error occurred while processing your request.",
        }
    }
}
