//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, the engines and the voice
//! transport, so sessions can run end to end without hardware.

#![allow(
    dead_code,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use beacon_voicebot::voice::{
    AudioCaptureStage, AudioClip, AudioPlaybackStage, BYTES_PER_SAMPLE, CaptureDevice,
    InputHandle, RecognitionEngine, ResponsePolicy, SAMPLE_RATE, SpeechRecognizer,
    SpeechSynthesizer, SynthesisEngine, VoiceChannel, VoiceConnection, VoiceConnector,
};
use beacon_voicebot::{Error, Pipeline, Result, SessionManager};

/// Tracks how many callers are inside a section at once
#[derive(Debug, Default)]
pub struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    pub fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Microphone that yields silence in real time
pub struct FakeMic {
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub concurrency: Arc<Concurrency>,
    pub fail: AtomicBool,
}

impl FakeMic {
    pub fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            concurrency: Arc::new(Concurrency::default()),
            fail: AtomicBool::new(false),
        }
    }
}

struct FakeInput {
    sample_rate: u32,
    fail: bool,
    closed: Arc<AtomicUsize>,
    concurrency: Arc<Concurrency>,
    open: bool,
}

impl CaptureDevice for FakeMic {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputHandle>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.concurrency.enter();
        Ok(Box::new(FakeInput {
            sample_rate,
            fail: self.fail.load(Ordering::SeqCst),
            closed: Arc::clone(&self.closed),
            concurrency: Arc::clone(&self.concurrency),
            open: true,
        }))
    }
}

impl InputHandle for FakeInput {
    fn read(&mut self, frames: usize) -> Result<Vec<u8>> {
        if self.fail {
            return Err(Error::Audio("device unplugged".to_string()));
        }
        let secs = frames as f64 / f64::from(self.sample_rate);
        std::thread::sleep(Duration::from_secs_f64(secs));
        Ok(vec![0; frames * BYTES_PER_SAMPLE])
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.concurrency.exit();
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Recognizer that always hears the same words
pub struct FakeRecognizer {
    pub text: String,
    pub concurrency: Arc<Concurrency>,
}

impl RecognitionEngine for FakeRecognizer {
    fn start(&mut self, _sample_rate: u32) -> Result<()> {
        self.concurrency.enter();
        Ok(())
    }

    fn accept_waveform(&mut self, _pcm: &[u8]) -> Result<bool> {
        Ok(false)
    }

    fn result(&mut self) -> Result<String> {
        Ok(r#"{"text": ""}"#.to_string())
    }

    fn final_result(&mut self) -> Result<String> {
        self.concurrency.exit();
        Ok(serde_json::json!({ "text": self.text }).to_string())
    }
}

/// What the fake synthesizer did
#[derive(Debug, Default)]
pub struct SynthLog {
    pub texts: Mutex<Vec<String>>,
    pub concurrency: Concurrency,
    /// Exit cleanly without writing anything
    pub silent: AtomicBool,
}

/// Synthesizer writing a fixed-length tone, optionally empty
pub struct FakeSynthesizer {
    pub log: Arc<SynthLog>,
    pub length: Duration,
    pub render_time: Duration,
    pub empty: bool,
}

impl SynthesisEngine for FakeSynthesizer {
    fn render(&mut self, text: &str, target: &Path) -> Result<()> {
        self.log.concurrency.enter();
        self.log
            .texts
            .lock()
            .unwrap()
            .push(text.to_string());
        std::thread::sleep(self.render_time);

        let result = if self.log.silent.load(Ordering::SeqCst) {
            Ok(())
        } else if self.empty {
            std::fs::write(target, b"").map_err(Error::from)
        } else {
            let count = (self.length.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize;
            let samples: Vec<i16> = (0..count).map(|i| ((i % 64) as i16 - 32) * 200).collect();
            AudioClip::from_i16(&samples)
                .to_wav()
                .and_then(|wav| std::fs::write(target, wav).map_err(Error::from))
        };

        self.log.concurrency.exit();
        result
    }
}

/// Voice connection that "plays" for the clip's length
#[derive(Default)]
pub struct FakeConnection {
    pub guild_id: u64,
    playing_until: Mutex<Option<Instant>>,
    pub plays: Mutex<Vec<(Instant, Duration)>>,
    pub stops: AtomicUsize,
    pub disconnected: AtomicBool,
}

impl FakeConnection {
    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn is_playing(&self) -> Result<bool> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Channel("connection closed".to_string()));
        }
        Ok(self
            .playing_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until))
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.playing_until.lock().unwrap() = None;
        Ok(())
    }

    async fn play(&self, clip: AudioClip) -> Result<()> {
        let now = Instant::now();
        *self.playing_until.lock().unwrap() = Some(now + clip.duration());
        self.plays.lock().unwrap().push((now, clip.duration()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        *self.playing_until.lock().unwrap() = None;
        Ok(())
    }
}

/// Hands out fake connections and remembers them
#[derive(Default)]
pub struct FakeConnector {
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
    /// One call per guild: connecting again returns the live one
    pub shared_calls: bool,
    pub connect_delay: Duration,
}

impl FakeConnector {
    /// Connections not yet disconnected
    pub fn live(&self) -> Vec<Arc<FakeConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.disconnected.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn for_guild(&self, guild_id: u64) -> Option<Arc<FakeConnection>> {
        self.live().into_iter().find(|c| c.guild_id == guild_id)
    }
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn connect(
        &self,
        guild_id: u64,
        _channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceConnection>> {
        tokio::time::sleep(self.connect_delay).await;
        if self.shared_calls
            && let Some(call) = self.for_guild(guild_id)
        {
            return Ok(call);
        }

        let connection = Arc::new(FakeConnection {
            guild_id,
            ..FakeConnection::default()
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Knobs for a test harness
pub struct Options {
    pub heard: &'static str,
    pub capture: Duration,
    pub reply_length: Duration,
    pub render_time: Duration,
    pub empty_speech: bool,
    pub poll_interval: Duration,
    pub shared_calls: bool,
    pub connect_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            heard: "hello there",
            capture: Duration::from_millis(200),
            reply_length: Duration::from_millis(200),
            render_time: Duration::from_millis(10),
            empty_speech: false,
            poll_interval: Duration::from_millis(20),
            shared_calls: false,
            connect_delay: Duration::ZERO,
        }
    }
}

/// A session manager wired to fakes
pub struct Harness {
    pub sessions: Arc<SessionManager>,
    pub connector: Arc<FakeConnector>,
    pub mic: Arc<FakeMic>,
    pub synth: Arc<SynthLog>,
    pub recognizer: Arc<Concurrency>,
    pub poll_interval: Duration,
    staging: tempfile::TempDir,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let mic = Arc::new(FakeMic::new());
        let connector = Arc::new(FakeConnector {
            shared_calls: options.shared_calls,
            connect_delay: options.connect_delay,
            ..FakeConnector::default()
        });
        let synth = Arc::new(SynthLog::default());
        let recognizer = Arc::new(Concurrency::default());

        let engine = FakeRecognizer {
            text: options.heard.to_string(),
            concurrency: Arc::clone(&recognizer),
        };
        let synthesizer = SpeechSynthesizer::spawn(
            Box::new(FakeSynthesizer {
                log: Arc::clone(&synth),
                length: options.reply_length,
                render_time: options.render_time,
                empty: options.empty_speech,
            }),
            staging.path().to_path_buf(),
        )
        .unwrap();

        let pipeline = Pipeline::new(
            AudioCaptureStage::new(Arc::clone(&mic) as Arc<dyn CaptureDevice>, 320),
            SpeechRecognizer::new(Box::new(engine), 8000),
            ResponsePolicy::default(),
            synthesizer,
            AudioPlaybackStage::new(
                options.poll_interval,
                Duration::from_millis(10),
                Duration::from_secs(1),
            ),
            options.capture,
        );

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&connector) as Arc<dyn VoiceConnector>,
            pipeline,
        ));

        Self {
            sessions,
            connector,
            mic,
            synth,
            recognizer,
            poll_interval: options.poll_interval,
            staging,
        }
    }

    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.staging.path()).unwrap().next().is_none()
    }
}

/// A voice channel the requesting user is in
pub fn channel(name: &str) -> Option<VoiceChannel> {
    Some(VoiceChannel {
        id: 42,
        name: name.to_string(),
    })
}

/// Wait until `check` passes or two seconds elapse
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
