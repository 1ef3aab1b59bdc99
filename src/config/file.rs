//! TOML configuration file loading
//!
//! Supports `~/.config/omni/voicebot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::ReplyRule;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoicebotConfigFile {
    /// Microphone capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech recognition engine
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    /// Speech synthesis engine
    #[serde(default)]
    pub synthesizer: SynthesizerFileConfig,

    /// Playback timing
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Media transcoder
    #[serde(default)]
    pub transcoder: TranscoderFileConfig,

    /// Reply rules
    #[serde(default)]
    pub replies: RepliesFileConfig,

    /// Discord gateway
    #[serde(default)]
    pub discord: DiscordFileConfig,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Seconds recorded per listen cycle
    pub duration_secs: Option<f64>,

    /// Samples read per frame
    pub frame_size: Option<usize>,

    /// Longest wait for one frame before the device counts as stalled
    pub read_timeout_ms: Option<u64>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// `process` or `whisper`
    pub engine: Option<String>,

    /// Model directory (or model file for whisper)
    pub model_dir: Option<PathBuf>,

    /// Recognizer program for the `process` engine
    pub program: Option<String>,

    /// Program arguments; `{model}` and `{rate}` are substituted
    pub args: Option<Vec<String>>,

    /// Bytes fed to the engine per chunk
    pub chunk_bytes: Option<usize>,

    /// Spoken language hint (whisper only)
    pub language: Option<String>,

    /// Worker threads (whisper only)
    pub threads: Option<i32>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesizerFileConfig {
    /// Synthesizer program
    pub program: Option<String>,

    /// Program arguments; `{text}`, `{output}`, `{rate}`, `{volume}` and
    /// `{amplitude}` are substituted
    pub args: Option<Vec<String>>,

    /// Extra arguments added when a voice is set; `{voice}` is substituted
    pub voice_args: Option<Vec<String>>,

    /// Speaking rate in words per minute
    pub rate: Option<u32>,

    /// Volume from 0.0 to 1.0
    pub volume: Option<f32>,

    /// Voice name
    pub voice: Option<String>,

    /// Directory rendered replies are staged in
    pub staging_dir: Option<PathBuf>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub poll_interval_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub grace_ms: Option<u64>,
}

/// Transcoder configuration
#[derive(Debug, Default, Deserialize)]
pub struct TranscoderFileConfig {
    /// Path to ffmpeg; looked up on `PATH` when unset
    pub ffmpeg: Option<PathBuf>,
}

/// Reply rule configuration
#[derive(Debug, Default, Deserialize)]
pub struct RepliesFileConfig {
    /// Replaces the built-in rules when present
    pub rules: Option<Vec<ReplyRule>>,

    /// Reply when no rule matches
    pub fallback: Option<String>,
}

/// Discord configuration
#[derive(Debug, Default, Deserialize)]
pub struct DiscordFileConfig {
    /// Bot token
    pub token: Option<String>,
}

/// Load the TOML config file
///
/// An explicitly given file must exist and parse. The standard path is
/// optional and falls back to defaults if it cannot be parsed.
///
/// # Errors
///
/// Returns error if an explicit file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<VoicebotConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = parse(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(VoicebotConfigFile::default());
    };

    if !path.exists() {
        return Ok(VoicebotConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(VoicebotConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(VoicebotConfigFile::default())
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not a valid config file
pub fn parse(content: &str) -> Result<VoicebotConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/omni/voicebot/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("voicebot")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = parse("").unwrap();
        assert!(config.capture.duration_secs.is_none());
        assert!(config.replies.rules.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config = parse(
            r#"
            [capture]
            duration_secs = 3.5

            [synthesizer]
            program = "say"
            rate = 180

            [[replies.rules]]
            keyword = "ping"
            response = "pong"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.duration_secs, Some(3.5));
        assert_eq!(config.synthesizer.program.as_deref(), Some("say"));
        assert_eq!(config.synthesizer.rate, Some(180));
        let rules = config.replies.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].keyword, "ping");
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(parse("[llm]\nmodel = \"x\""), Err(Error::Toml(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_fatal() {
        let err = load_config_file(Some(Path::new("/nonexistent/voicebot.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
