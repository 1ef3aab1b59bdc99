//! Voice pipeline stages without a session around them
//!
//! Runs on the in-memory fakes, no audio hardware needed

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use beacon_voicebot::Error;
use beacon_voicebot::error::SynthesisFailure;
use beacon_voicebot::voice::SpeechSynthesizer;
use common::{FakeConnection, FakeSynthesizer, Harness, Options, SynthLog};

fn synthesizer(log: &Arc<SynthLog>, length: Duration) -> (SpeechSynthesizer, tempfile::TempDir) {
    let staging = tempfile::tempdir().unwrap();
    let synthesizer = SpeechSynthesizer::spawn(
        Box::new(FakeSynthesizer {
            log: Arc::clone(log),
            length,
            render_time: Duration::ZERO,
            empty: false,
        }),
        staging.path().to_path_buf(),
    )
    .unwrap();
    (synthesizer, staging)
}

#[tokio::test]
async fn test_pipeline_runs_on_a_bare_connection() {
    let h = Harness::new(Options::default());
    let connection = FakeConnection::default();

    let result = assert_ok!(
        h.sessions
            .pipeline()
            .run(7, &connection, &CancellationToken::new())
            .await
    );

    assert_eq!(result.reply.as_deref(), Some("Hello!"));
    assert_eq!(connection.play_count(), 1);
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn test_cancelled_pipeline_never_opens_the_mic() {
    let h = Harness::new(Options::default());
    let connection = FakeConnection::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(h.sessions.pipeline().run(7, &connection, &cancel).await);

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(h.mic.opened.load(Ordering::SeqCst), 0);
    assert_eq!(connection.play_count(), 0);
}

#[tokio::test]
async fn test_blank_text_never_reaches_the_engine() {
    let log = Arc::new(SynthLog::default());
    let (synthesizer, _staging) = synthesizer(&log, Duration::from_millis(100));

    for text in ["", "   ", "\n"] {
        let err = assert_err!(synthesizer.synthesize(text, 1, &CancellationToken::new()).await);
        assert!(matches!(err, Error::Synthesis(SynthesisFailure::EmptyOutput)));
    }
    assert!(log.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_synthesized_clip_has_engine_length() {
    let log = Arc::new(SynthLog::default());
    let (synthesizer, staging) = synthesizer(&log, Duration::from_millis(250));

    let clip = assert_ok!(
        synthesizer
            .synthesize("Goodbye! Have a great day!", 3, &CancellationToken::new())
            .await
    );

    assert_eq!(clip.duration(), Duration::from_millis(250));
    assert_eq!(clip.samples().len(), 4000);
    assert_eq!(
        *log.texts.lock().unwrap(),
        vec!["Goodbye! Have a great day!".to_string()]
    );
    assert!(std::fs::read_dir(staging.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_synthesis_jobs_run_one_at_a_time() {
    let log = Arc::new(SynthLog::default());
    let staging = tempfile::tempdir().unwrap();
    let synthesizer = SpeechSynthesizer::spawn(
        Box::new(FakeSynthesizer {
            log: Arc::clone(&log),
            length: Duration::from_millis(50),
            render_time: Duration::from_millis(50),
            empty: false,
        }),
        staging.path().to_path_buf(),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let (a, b, c) = tokio::join!(
        synthesizer.synthesize("one", 1, &cancel),
        synthesizer.synthesize("two", 2, &cancel),
        synthesizer.synthesize("three", 3, &cancel),
    );
    assert_ok!(a);
    assert_ok!(b);
    assert_ok!(c);

    assert_eq!(log.concurrency.peak(), 1);
    assert_eq!(log.texts.lock().unwrap().len(), 3);
}
