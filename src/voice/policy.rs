//! Keyword reply lookup

use serde::Deserialize;

use super::stt::Transcript;

/// Reply used when no rule matches
pub const DEFAULT_FALLBACK: &str = "Sorry! I couldn't understand that. Please try again.";

/// A keyword and the reply it triggers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyRule {
    /// Matched case-insensitively as a substring of the transcript
    pub keyword: String,

    /// Reply text
    pub response: String,
}

impl ReplyRule {
    /// Create a rule; the keyword is stored lower-cased
    #[must_use]
    pub fn new(keyword: &str, response: &str) -> Self {
        Self {
            keyword: keyword.to_lowercase(),
            response: response.to_string(),
        }
    }
}

/// Ordered reply rules, first match wins
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    rules: Vec<ReplyRule>,
    fallback: String,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::new(default_rules(), DEFAULT_FALLBACK)
    }
}

impl ResponsePolicy {
    /// Build a policy from rules in evaluation order
    #[must_use]
    pub fn new(rules: Vec<ReplyRule>, fallback: &str) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| ReplyRule {
                keyword: r.keyword.to_lowercase(),
                response: r.response,
            })
            .collect();

        Self {
            rules,
            fallback: fallback.to_string(),
        }
    }

    /// Pick the reply for a transcript
    #[must_use]
    pub fn resolve(&self, transcript: &Transcript) -> &str {
        self.resolve_text(transcript.text())
    }

    /// Pick the reply for raw text
    #[must_use]
    pub fn resolve_text(&self, text: &str) -> &str {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| text.contains(&rule.keyword))
            .map_or(self.fallback.as_str(), |rule| rule.response.as_str())
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[ReplyRule] {
        &self.rules
    }

    /// Reply used when nothing matches
    #[must_use]
    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

/// The built-in rule set
#[must_use]
pub fn default_rules() -> Vec<ReplyRule> {
    vec![
        ReplyRule::new("hello", "Hello!"),
        ReplyRule::new("how are you", "I'm doing well, thanks for asking!"),
        ReplyRule::new(
            "what time",
            "I can't tell you the exact time, but I can help you with other things!",
        ),
        ReplyRule::new(
            "help",
            "I can understand voice commands and respond to basic questions. Try saying hello!",
        ),
        ReplyRule::new("goodbye", "Goodbye! Have a great day!"),
        ReplyRule::new(
            "weather",
            "I'm sorry, I don't have access to weather information, but I can help you with other questions!",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let policy = ResponsePolicy::default();
        // "hello" is declared before "how are you"
        assert_eq!(policy.resolve_text("hello, how are you"), "Hello!");
    }

    #[test]
    fn test_case_insensitive() {
        let policy = ResponsePolicy::default();
        assert_eq!(
            policy.resolve_text("HELLO there"),
            policy.resolve_text("hello there")
        );
    }

    #[test]
    fn test_fallback() {
        let policy = ResponsePolicy::default();
        assert_eq!(policy.resolve_text("xyzzy"), DEFAULT_FALLBACK);
        assert_eq!(policy.resolve_text(""), DEFAULT_FALLBACK);
    }

    #[test]
    fn test_uppercase_keyword_is_normalised() {
        let policy = ResponsePolicy::new(
            vec![ReplyRule {
                keyword: "PING".to_string(),
                response: "pong".to_string(),
            }],
            "?",
        );
        assert_eq!(policy.resolve_text("ping me"), "pong");
    }
}
