use std::path::PathBuf;
use std::process::ExitCode;
#[cfg(feature = "audio-io")]
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voicebot::Config;
#[cfg(feature = "audio-io")]
use beacon_voicebot::voice::{CaptureDevice, CpalCaptureDevice};

/// Voicebot - listens in a voice channel and answers out loud
#[derive(Parser)]
#[command(name = "voicebot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/voicebot/config.toml)
    #[arg(short, long, env = "VOICEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a local session from the terminal (default)
    Console,
    /// Serve /join, /leave and /listen on Discord
    Discord,
    /// Record from the microphone and report levels
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Also write the recording to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Synthesize text and play it on the speaker
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,

        /// Write the audio to a WAV file instead of playing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the reply a transcript would get
    Reply {
        /// Transcript text
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voicebot=info",
        1 => "info,beacon_voicebot=debug",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Console) {
        Command::Console => console(&config).await,
        Command::Discord => discord(&config).await,
        Command::TestMic { duration, output } => test_mic(&config, duration, output).await,
        Command::TestTts { text, output } => test_tts(&config, &text, output).await,
        Command::Reply { text } => {
            println!("{}", config.replies.resolve_text(&text));
            Ok(())
        }
    }
}

#[cfg(feature = "audio-io")]
fn capture_device(config: &Config) -> anyhow::Result<Arc<dyn CaptureDevice>> {
    let device = CpalCaptureDevice::new(config.capture.read_timeout)?;
    Ok(Arc::new(device))
}

/// Local console session on the default microphone and speaker
#[cfg(feature = "audio-io")]
async fn console(config: &Config) -> anyhow::Result<()> {
    use beacon_voicebot::SessionManager;
    use beacon_voicebot::channels::{ConsoleGateway, SpeakerConnector};

    let pipeline = config.pipeline(capture_device(config)?)?;
    let sessions = Arc::new(SessionManager::new(Arc::new(SpeakerConnector), pipeline));

    tracing::info!("voicebot console ready");

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    ConsoleGateway::new(sessions)
        .run(input, tokio::io::stdout())
        .await?;
    Ok(())
}

#[cfg(not(feature = "audio-io"))]
#[allow(clippy::unused_async)]
async fn console(_config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("the console needs the `audio-io` feature")
}

/// Discord gateway; audio is captured from the local microphone
#[cfg(all(feature = "discord", feature = "audio-io"))]
async fn discord(config: &Config) -> anyhow::Result<()> {
    use beacon_voicebot::SessionManager;
    use beacon_voicebot::channels::{DiscordGateway, SongbirdConnector};

    let token = config
        .discord_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no Discord token; set DISCORD_TOKEN"))?;

    let transcoder = config.transcoder()?;
    let pipeline = config.pipeline(capture_device(config)?)?;
    let songbird = songbird::Songbird::serenity();
    let connector = SongbirdConnector::new(Arc::clone(&songbird), transcoder);
    let sessions = Arc::new(SessionManager::new(Arc::new(connector), pipeline));

    let gateway = DiscordGateway::new(token, sessions, songbird);
    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

#[cfg(not(all(feature = "discord", feature = "audio-io")))]
#[allow(clippy::unused_async)]
async fn discord(_config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("the Discord gateway needs the `discord` and `audio-io` features")
}

/// Record from the microphone and report levels
#[cfg(feature = "audio-io")]
async fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    use std::time::Duration;

    use beacon_voicebot::voice::{AudioCaptureStage, SAMPLE_RATE};
    use tokio_util::sync::CancellationToken;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let stage = AudioCaptureStage::new(capture_device(config)?, config.capture.frame_size);
    let clip = stage
        .capture(Duration::from_secs(duration), SAMPLE_RATE, &CancellationToken::new())
        .await?;

    let samples = clip.samples_f32();
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    println!(
        "Captured {} samples | RMS: {:.4} | Peak: {:.4}",
        samples.len(),
        calculate_rms(&samples),
        peak
    );

    if let Some(path) = output {
        std::fs::write(&path, clip.to_wav()?)?;
        println!("Wrote {}", path.display());
    }

    println!("\n---");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

#[cfg(not(feature = "audio-io"))]
#[allow(clippy::unused_async)]
async fn test_mic(
    _config: &Config,
    _duration: u64,
    _output: Option<PathBuf>,
) -> anyhow::Result<()> {
    anyhow::bail!("microphone access needs the `audio-io` feature")
}

/// Calculate RMS energy
#[cfg(feature = "audio-io")]
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Synthesize text and play or save it
async fn test_tts(config: &Config, text: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    use tokio_util::sync::CancellationToken;

    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = config.speech_synthesizer()?;
    let cancel = CancellationToken::new();
    let clip = synthesizer.synthesize(text, 0, &cancel).await?;
    println!("Got {} ms of audio", clip.duration().as_millis());

    if let Some(path) = output {
        std::fs::write(&path, clip.to_wav()?)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    #[cfg(feature = "audio-io")]
    {
        use beacon_voicebot::channels::SpeakerConnection;

        println!("Playing audio...");
        let speaker = SpeakerConnection::default();
        config.playback_stage().play(&speaker, clip, &cancel).await?;
        println!("\n---");
        println!("If you heard the speech, TTS is working!");
    }

    #[cfg(not(feature = "audio-io"))]
    {
        drop(clip);
        println!("Built without `audio-io`; pass --output to save the audio");
    }

    Ok(())
}
