//! Clip transcoding through ffmpeg

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::clip::{AudioClip, SAMPLE_RATE};
use crate::{Error, Result};

/// Converts clips into the format a voice transport expects
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
}

impl Transcoder {
    /// Resolve ffmpeg from a configured path or `PATH`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if ffmpeg cannot be found
    pub fn resolve(configured: Option<&Path>) -> Result<Self> {
        let ffmpeg = match configured {
            Some(path) => which::which(path).map_err(|e| {
                Error::Config(format!("ffmpeg not found at {}: {e}", path.display()))
            })?,
            None => which::which("ffmpeg")
                .map_err(|e| Error::Config(format!("ffmpeg not found on PATH: {e}")))?,
        };

        tracing::debug!(ffmpeg = %ffmpeg.display(), "transcoder resolved");
        Ok(Self { ffmpeg })
    }

    /// Resolved ffmpeg binary
    #[must_use]
    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Convert a clip to interleaved little-endian f32 PCM
    ///
    /// # Errors
    ///
    /// Returns error if ffmpeg fails or produces nothing
    pub async fn to_f32le(
        &self,
        clip: &AudioClip,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Vec<u8>> {
        let in_rate = SAMPLE_RATE.to_string();
        let out_rate = sample_rate.to_string();
        let out_channels = channels.to_string();

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "s16le", "-ar", in_rate.as_str(), "-ac", "1"])
            .args(["-i", "pipe:0"])
            .args(["-f", "f32le", "-ar", out_rate.as_str()])
            .args(["-ac", out_channels.as_str(), "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Audio("ffmpeg stdin unavailable".to_string()))?;
        let input = clip.payload().to_vec();
        let feeder = tokio::spawn(async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        });

        let output = child.wait_with_output().await?;
        feeder
            .await
            .map_err(|e| Error::Audio(format!("ffmpeg feeder failed: {e}")))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Audio(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::Audio("ffmpeg produced no audio".to_string()));
        }

        Ok(output.stdout)
    }
}
