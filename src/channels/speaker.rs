//! Local speaker as a voice connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::voice::{AudioClip, SAMPLE_RATE, VoiceChannel, VoiceConnection, VoiceConnector, resample};
use crate::{Error, Result};

/// How often the output thread checks for stop or completion
const TICK: Duration = Duration::from_millis(20);

/// Connects "voice channels" to the default output device
#[derive(Debug, Default)]
pub struct SpeakerConnector;

#[async_trait]
impl VoiceConnector for SpeakerConnector {
    async fn connect(
        &self,
        guild_id: u64,
        channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            guild_id,
            channel = %channel.name,
            device = device.name().unwrap_or_default(),
            "speaker connected"
        );

        Ok(Arc::new(SpeakerConnection::default()))
    }
}

struct Track {
    stop: AtomicBool,
    done: AtomicBool,
}

/// Plays clips on the default output device, one at a time
#[derive(Default)]
pub struct SpeakerConnection {
    current: Mutex<Option<Arc<Track>>>,
}

#[async_trait]
impl VoiceConnection for SpeakerConnection {
    async fn is_playing(&self) -> Result<bool> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(current
            .as_ref()
            .is_some_and(|track| !track.done.load(Ordering::Acquire)))
    }

    async fn stop(&self) -> Result<()> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(track) = current.as_ref() {
            track.stop.store(true, Ordering::Release);
        }
        Ok(())
    }

    async fn play(&self, clip: AudioClip) -> Result<()> {
        let track = Arc::new(Track {
            stop: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let worker_track = Arc::clone(&track);
        std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let outcome = play_blocking(&clip, &worker_track, started_tx);
                if let Err(e) = outcome {
                    tracing::error!(error = %e, "speaker playback failed");
                }
                worker_track.done.store(true, Ordering::Release);
            })?;

        started_rx
            .await
            .map_err(|_| Error::Playback("speaker thread exited".to_string()))??;

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(track);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop().await
    }
}

/// Output streams are not `Send`, so each clip is played on its own thread
fn play_blocking(
    clip: &AudioClip,
    track: &Track,
    started: tokio::sync::oneshot::Sender<Result<()>>,
) -> Result<()> {
    let (stream, finished) = match open_stream(clip) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = started.send(Err(Error::Playback(e.to_string())));
            return Ok(());
        }
    };
    let _ = started.send(Ok(()));

    while !finished.load(Ordering::Acquire) && !track.stop.load(Ordering::Acquire) {
        std::thread::sleep(TICK);
    }

    stream.pause().map_err(|e| Error::Audio(e.to_string()))?;
    drop(stream);
    tracing::debug!(
        stopped = track.stop.load(Ordering::Acquire),
        "speaker playback ended"
    );
    Ok(())
}

fn open_stream(clip: &AudioClip) -> Result<(cpal::Stream, Arc<AtomicBool>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .config();

    let channels = usize::from(config.channels);
    let samples = resample(&clip.samples_f32(), SAMPLE_RATE, config.sample_rate.0)?;

    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if position < samples.len() {
                        position += 1;
                    } else {
                        finished_cb.store(true, Ordering::Release);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!(
        sample_rate = config.sample_rate.0,
        channels,
        length_ms = clip.duration().as_millis(),
        "speaker playback started"
    );

    Ok((stream, finished))
}
