//! Greeting detection for the fast path.

use crate::conversation::current_question;

const KEYWORDS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good evening",
    "good afternoon",
    "what's up",
    "how are you",
    "yo",
    "hola",
    "sup",
    "greetings",
];

/// Lowercase and collapse runs of whitespace.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn words(normalized: &str) -> Vec<String> {
    normalized
        .replace('’', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `text` is a greeting that needs no retrieval.
///
/// Keywords match as whole words or phrases, so "which" does not count as
/// "hi". Anything of two characters or fewer is treated as smalltalk. Only
/// the current question of a history-prefixed prompt is classified.
pub fn is_smalltalk(text: &str) -> bool {
    let normalized = normalize(current_question(text));
    if normalized.is_empty() {
        return false;
    }
    if normalized.chars().count() <= 2 {
        return true;
    }

    let words = words(&normalized);
    KEYWORDS.iter().any(|keyword| {
        let phrase: Vec<&str> = keyword.split(' ').collect();
        words
            .windows(phrase.len())
            .any(|window| window.iter().zip(&phrase).all(|(w, p)| w == p))
    })
}

/// The canned acknowledgment written in place of a summary.
pub fn smalltalk_reply(query: Option<&str>) -> String {
    match query.map(|q| current_question(q).trim()).filter(|q| !q.is_empty()) {
        Some(q) => format!(
            "Hey! You said “{}”. I'm here when you want to explore your PDFs.",
            q
        ),
        None => "Hey! I'm ready whenever you want to dive into your documents.".to_string(),
    }
}
