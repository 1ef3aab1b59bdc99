//! Reply selection over the built-in rules

use beacon_voicebot::voice::{DEFAULT_FALLBACK, ReplyRule, ResponsePolicy, Transcript};

#[test]
fn test_built_in_replies() {
    let policy = ResponsePolicy::default();

    let cases = [
        ("hello bot", "Hello!"),
        ("hey, how are you today", "I'm doing well, thanks for asking!"),
        (
            "what time is it",
            "I can't tell you the exact time, but I can help you with other things!",
        ),
        (
            "can you help me",
            "I can understand voice commands and respond to basic questions. Try saying hello!",
        ),
        ("ok goodbye", "Goodbye! Have a great day!"),
        (
            "what's the weather like",
            "I'm sorry, I don't have access to weather information, but I can help you with other questions!",
        ),
        ("banana", DEFAULT_FALLBACK),
    ];

    for (heard, expected) in cases {
        assert_eq!(policy.resolve(&Transcript::new(heard)), expected, "for {heard:?}");
    }
}

#[test]
fn test_fallback_text() {
    assert_eq!(
        DEFAULT_FALLBACK,
        "Sorry! I couldn't understand that. Please try again."
    );
}

#[test]
fn test_resolution_is_deterministic() {
    let policy = ResponsePolicy::default();
    let transcript = Transcript::new("Hello, what time is it?");

    let first = policy.resolve(&transcript).to_string();
    for _ in 0..10 {
        assert_eq!(policy.resolve(&transcript), first);
    }
    assert_eq!(first, "Hello!");
}

#[test]
fn test_keywords_match_inside_words() {
    let policy = ResponsePolicy::default();
    // Substring match, so "othello" contains "hello"
    assert_eq!(policy.resolve_text("I read Othello"), "Hello!");
    assert_eq!(policy.resolve_text("HELP"), policy.resolve_text("help"));
}

#[test]
fn test_custom_rules_keep_declared_order() {
    let policy = ResponsePolicy::new(
        vec![
            ReplyRule::new("weather", "No idea."),
            ReplyRule::new("hello", "Hi!"),
        ],
        "Say again?",
    );

    assert_eq!(policy.resolve_text("hello, how's the weather"), "No idea.");
    assert_eq!(policy.resolve_text("hello"), "Hi!");
    assert_eq!(policy.resolve_text("nothing"), "Say again?");
    assert_eq!(policy.fallback(), "Say again?");
}
