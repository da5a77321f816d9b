//! Detection of interactive prompts in child process output.

use std::sync::LazyLock;

use regex::Regex;

/// Decides whether an output chunk is asking for confirmation.
pub trait PromptClassifier: Send + Sync {
    fn is_prompt(&self, chunk: &str) -> bool;
}

impl<F> PromptClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_prompt(&self, chunk: &str) -> bool {
        self(chunk)
    }
}

static PROMPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpress\b.*\bkey\b|\by/n\b|\bconfirm").expect("prompt pattern is valid")
});

/// Matches "press ... key", "y/n" and "confirm", case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptClassifier;

impl PromptClassifier for DefaultPromptClassifier {
    fn is_prompt(&self, chunk: &str) -> bool {
        PROMPT_PATTERN.is_match(chunk)
    }
}
