//! Scripted collaborators and fixtures shared by the Ragloop test suites.
//!
//! Every mock counts its calls and records its inputs so tests can assert
//! which collaborators a run actually touched.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use ragloop_core::config::AppConfig;
use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::{DocumentRetriever, RatingService, TextGenerator, WebSearcher};
use ragloop_core::types::{DocumentHit, HitMetadata, Rating, WebResult};
use tempfile::NamedTempFile;

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

type Reply = std::result::Result<String, String>;

struct Rule {
    needle: String,
    replies: Vec<Reply>,
    hits: AtomicUsize,
}

/// Text generator answering by prompt content.
///
/// Rules are checked in insertion order; the first whose needle occurs in the
/// prompt wins. A rule with several replies gives them in order and repeats
/// the last one. Unmatched prompts get the default reply.
pub struct ScriptedGenerator {
    rules: Vec<Rule>,
    default: Reply,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: Ok(default_reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fails every prompt not matched by a rule.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            default: Err(message.into()),
            ..Self::new("")
        }
    }

    fn rule(mut self, needle: impl Into<String>, replies: Vec<Reply>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            replies,
            hits: AtomicUsize::new(0),
        });
        self
    }

    pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rule(needle, vec![Ok(reply.into())])
    }

    /// Answer successive matching prompts with `replies` in order.
    pub fn on_sequence<I, R>(self, needle: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let replies: Vec<Reply> = replies.into_iter().map(|r| Ok(r.into())).collect();
        assert!(!replies.is_empty(), "on_sequence needs at least one reply");
        self.rule(needle, replies)
    }

    pub fn on_fail(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rule(needle, vec![Err(message.into())])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of recorded prompts containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let reply = match self
                .rules
                .iter()
                .find(|rule| prompt.contains(rule.needle.as_str()))
            {
                Some(rule) => {
                    let n = rule.hits.fetch_add(1, Ordering::SeqCst);
                    rule.replies[n.min(rule.replies.len() - 1)].clone()
                }
                None => self.default.clone(),
            };
            self.prompts.lock().unwrap().push(prompt);
            reply.map_err(RagloopError::LlmRequest)
        })
    }
}

/// Rating service replaying a script; the last entry repeats once exhausted.
pub struct ScriptedRater {
    script: Mutex<VecDeque<std::result::Result<Rating, String>>>,
    last: Mutex<std::result::Result<Rating, String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedRater {
    pub fn new(script: impl IntoIterator<Item = std::result::Result<Rating, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(Err("rating script is empty".into())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(rating: Rating) -> Self {
        Self::new([Ok(rating)])
    }

    /// Rejected `n` times, approved afterwards.
    pub fn approve_after(n: usize) -> Self {
        Self::new(
            std::iter::repeat(Ok(Rating::Rejected))
                .take(n)
                .chain([Ok(Rating::Approved)]),
        )
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new([Err(message.into())])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl RatingService for ScriptedRater {
    fn rate(&self, prompt: String) -> BoxFuture<'_, Result<Rating>> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt);
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            last.clone().map_err(RagloopError::LlmParse)
        })
    }
}

/// Document retriever returning a fixed result.
pub struct StaticRetriever {
    result: std::result::Result<Vec<DocumentHit>, String>,
    queries: Mutex<Vec<(String, usize)>>,
    delay: Option<Duration>,
}

impl StaticRetriever {
    pub fn new(hits: Vec<DocumentHit>) -> Self {
        Self {
            result: Ok(hits),
            queries: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            ..Self::empty()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    /// `(query, top_k)` of every call.
    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

impl DocumentRetriever for StaticRetriever {
    fn search(&self, query: String, top_k: usize) -> BoxFuture<'_, Result<Vec<DocumentHit>>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push((query, top_k));
            pause(self.delay).await;
            self.result
                .clone()
                .map(|hits| hits.into_iter().take(top_k).collect())
                .map_err(RagloopError::Retrieval)
        })
    }
}

/// Web searcher returning a fixed result.
pub struct StaticWebSearcher {
    result: std::result::Result<Vec<WebResult>, String>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticWebSearcher {
    pub fn new(results: Vec<WebResult>) -> Self {
        Self {
            result: Ok(results),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            ..Self::empty()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WebSearcher for StaticWebSearcher {
    fn name(&self) -> &str {
        "static"
    }

    fn search(&self, _query: String) -> BoxFuture<'_, Result<Vec<WebResult>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            pause(self.delay).await;
            self.result.clone().map_err(|message| RagloopError::WebSearch {
                provider: "static".into(),
                message,
            })
        })
    }
}

// -- Fixtures --

pub fn hit(content: &str, content_type: &str, tokens: u64) -> DocumentHit {
    DocumentHit {
        content: content.to_string(),
        metadata: HitMetadata {
            content_type: Some(content_type.to_string()),
            token_count: Some(tokens),
            filename: Some("handbook.pdf".to_string()),
            score: Some(1.0),
        },
    }
}

pub fn web_result(title: &str, snippet: &str, link: &str) -> WebResult {
    WebResult {
        title: title.to_string(),
        snippet: snippet.to_string(),
        link: link.to_string(),
    }
}

pub fn paris_result() -> WebResult {
    web_result(
        "Paris - Wikipedia",
        "Paris is the capital and largest city of France.",
        "https://en.wikipedia.org/wiki/Paris",
    )
}

/// Write `toml` to a temp file and load it as an [`AppConfig`].
pub fn config_from_toml(toml: &str) -> (NamedTempFile, AppConfig) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    let config = AppConfig::load(file.path()).unwrap();
    (file, config)
}
