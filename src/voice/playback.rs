//! Audio playback over a voice connection

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::clip::AudioClip;
use crate::{Error, Result};

/// A voice channel a session can connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannel {
    /// Platform channel ID
    pub id: u64,

    /// Display name
    pub name: String,
}

/// Outbound side of a live voice connection
///
/// Provided by the chat platform; one per guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Whether a clip is currently playing
    async fn is_playing(&self) -> Result<bool>;

    /// Stop whatever is playing
    async fn stop(&self) -> Result<()>;

    /// Start playing a clip; returns once playback has started
    async fn play(&self, clip: AudioClip) -> Result<()>;

    /// Leave the voice channel
    async fn disconnect(&self) -> Result<()>;
}

/// Opens voice connections
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Connect to `channel` in `guild_id`
    async fn connect(&self, guild_id: u64, channel: &VoiceChannel)
    -> Result<Arc<dyn VoiceConnection>>;
}

/// Plays clips and waits for them to finish
#[derive(Debug, Clone)]
pub struct AudioPlaybackStage {
    poll_interval: Duration,
    settle: Duration,
    grace: Duration,
}

impl AudioPlaybackStage {
    /// Create a playback stage
    ///
    /// * `poll_interval` - how often the connection is asked whether it is still playing
    /// * `settle` - pause after stopping a previous clip
    /// * `grace` - time past the clip's length before playback counts as stuck
    #[must_use]
    pub fn new(poll_interval: Duration, settle: Duration, grace: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            settle,
            grace,
        }
    }

    /// Interval between completion polls
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Play `clip` on `connection` until it finishes or `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token fires (playback is stopped first),
    /// `Playback` on any transport failure
    pub async fn play(
        &self,
        connection: &dyn VoiceConnection,
        clip: AudioClip,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if connection.is_playing().await.map_err(playback_error)? {
            tracing::debug!("stopping current playback");
            connection.stop().await.map_err(playback_error)?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(self.settle) => {}
            }
        }

        let deadline = Instant::now() + clip.duration() + self.grace;
        let length = clip.duration();
        connection.play(clip).await.map_err(playback_error)?;
        tracing::debug!(length_ms = length.as_millis(), "playback started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if let Err(e) = connection.stop().await {
                        tracing::warn!(error = %e, "failed to stop cancelled playback");
                    }
                    tracing::debug!("playback cancelled");
                    return Err(Error::Cancelled);
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }

            let playing = match connection.is_playing().await {
                Ok(playing) => playing,
                // The connection goes away right after a leave cancels us
                Err(_) if cancel.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => return Err(playback_error(e)),
            };
            if !playing {
                tracing::debug!("playback complete");
                return Ok(());
            }

            if Instant::now() > deadline {
                if let Err(e) = connection.stop().await {
                    tracing::warn!(error = %e, "failed to stop stuck playback");
                }
                return Err(Error::Playback("playback did not finish".to_string()));
            }
        }
    }
}

fn playback_error(e: Error) -> Error {
    match e {
        Error::Playback(_) | Error::Cancelled => e,
        other => Error::Playback(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Plays for a fixed number of polls, or forever when `stuck`
    #[derive(Default)]
    struct PolledConnection {
        remaining: Mutex<usize>,
        polls_per_clip: usize,
        stuck: bool,
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl VoiceConnection for PolledConnection {
        async fn is_playing(&self) -> Result<bool> {
            if self.stuck {
                return Ok(true);
            }
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return Ok(false);
            }
            *remaining -= 1;
            Ok(true)
        }

        async fn stop(&self) -> Result<()> {
            self.events.lock().unwrap().push("stop");
            *self.remaining.lock().unwrap() = 0;
            Ok(())
        }

        async fn play(&self, _clip: AudioClip) -> Result<()> {
            self.events.lock().unwrap().push("play");
            *self.remaining.lock().unwrap() = self.polls_per_clip;
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn stage() -> AudioPlaybackStage {
        AudioPlaybackStage::new(
            Duration::from_millis(5),
            Duration::from_millis(1),
            Duration::from_millis(50),
        )
    }

    fn clip() -> AudioClip {
        AudioClip::from_i16(&[100; 160])
    }

    #[tokio::test]
    async fn test_plays_until_finished() {
        let connection = PolledConnection {
            polls_per_clip: 3,
            ..PolledConnection::default()
        };
        stage()
            .play(&connection, clip(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*connection.events.lock().unwrap(), vec!["play"]);
    }

    #[tokio::test]
    async fn test_stops_current_playback_first() {
        let connection = PolledConnection {
            polls_per_clip: 1,
            ..PolledConnection::default()
        };
        *connection.remaining.lock().unwrap() = 100;

        stage()
            .play(&connection, clip(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*connection.events.lock().unwrap(), vec!["stop", "play"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_playback() {
        let connection = Arc::new(PolledConnection {
            stuck: true,
            ..PolledConnection::default()
        });
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            canceller.cancel();
        });

        let err = stage()
            .play(connection.as_ref(), clip(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(
            *connection.events.lock().unwrap(),
            vec!["stop", "play", "stop"]
        );
    }

    #[tokio::test]
    async fn test_stuck_transport_is_playback_error() {
        let connection = PolledConnection {
            stuck: true,
            ..PolledConnection::default()
        };
        let err = stage()
            .play(&connection, clip(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
    }
}
