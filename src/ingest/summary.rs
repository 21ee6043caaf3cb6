// src/ingest/summary.rs
//! Best-effort article summaries: a remote model behind a cache, with the
//! local extractor as the fallback.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::extract::{fallback_summary, main_text};
use crate::config::AiSettings;
use crate::security::truncate_chars;

pub const SUMMARY_MAX_CHARS: usize = 140;
const MIN_INPUT_CHARS: usize = 100;
const MAX_INPUT_CHARS: usize = 3000;
const CACHE_CAP: usize = 2048;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarizer not configured")]
    Disabled,
    #[error("article text too short to summarize")]
    TooShort,
    #[error("summarizer request failed: {0}")]
    Http(String),
    #[error("summarizer returned status {0}")]
    Status(u16),
    #[error("summarizer returned no text")]
    Empty,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize an article page. Implementations receive the raw detail HTML.
    async fn summarize(&self, html: &str) -> Result<String, SummaryError>;

    fn name(&self) -> &'static str;
}

/// Text sent to a remote model: the main content region, or `None` when it is
/// too short to be an article.
pub fn prepare_input(html: &str) -> Option<String> {
    let text = main_text(html);
    if text.chars().count() < MIN_INPUT_CHARS {
        return None;
    }
    Some(truncate_chars(&text, MAX_INPUT_CHARS))
}

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(settings: &AiSettings) -> Result<Self, SummaryError> {
        let api_key = settings.api_key.clone().ok_or(SummaryError::Disabled)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("industry-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| SummaryError::Http(e.to_string()))?;
        Ok(Self {
            http,
            api_base: settings.api_base.clone(),
            api_key,
            model: settings.summary_model.clone(),
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, html: &str) -> Result<String, SummaryError> {
        let input = prepare_input(html).ok_or(SummaryError::TooShort)?;

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = format!(
            "Summarize the news article for an e-mail digest in at most {SUMMARY_MAX_CHARS} characters, \
             in the article's language. State the core facts only. Output the summary text without any prefix."
        );
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.3,
            max_tokens: 300,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| SummaryError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SummaryError::Status(resp.status().as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| SummaryError::Http(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(SummaryError::Empty);
        }
        Ok(truncate_chars(content, SUMMARY_MAX_CHARS))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// In-process cache keyed by SHA-256 of the prepared input, so the same article
/// reached from two sources costs one call.
pub struct CachedSummarizer<S: Summarizer> {
    inner: S,
    cache: Mutex<HashMap<String, String>>,
}

impl<S: Summarizer> CachedSummarizer<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: String, value: String) {
        if let Ok(mut g) = self.cache.lock() {
            if g.len() >= CACHE_CAP {
                g.clear();
            }
            g.insert(key, value);
        }
    }
}

fn cache_key(html: &str) -> String {
    let basis = prepare_input(html).unwrap_or_else(|| html.to_string());
    let digest = Sha256::digest(basis.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl<S: Summarizer> Summarizer for CachedSummarizer<S> {
    async fn summarize(&self, html: &str) -> Result<String, SummaryError> {
        let key = cache_key(html);
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let fresh = self.inner.summarize(html).await?;
        self.put(key, fresh.clone());
        Ok(fresh)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Deterministic local extractor; never calls out.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExtractor;

#[async_trait]
impl Summarizer for LocalExtractor {
    async fn summarize(&self, html: &str) -> Result<String, SummaryError> {
        let s = fallback_summary(html, SUMMARY_MAX_CHARS);
        if s.is_empty() {
            Err(SummaryError::Empty)
        } else {
            Ok(s)
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Primary summarizer with a fallback chosen when the primary errors or is absent.
pub struct SummaryChain {
    primary: Option<Arc<dyn Summarizer>>,
    fallback: Arc<dyn Summarizer>,
}

impl SummaryChain {
    pub fn new(primary: Option<Arc<dyn Summarizer>>, fallback: Arc<dyn Summarizer>) -> Self {
        Self { primary, fallback }
    }

    /// Remote model (cached) when configured, local extractor otherwise.
    pub fn from_settings(settings: &AiSettings) -> Self {
        let primary: Option<Arc<dyn Summarizer>> = match OpenAiSummarizer::new(settings) {
            Ok(s) => Some(Arc::new(CachedSummarizer::new(s))),
            Err(SummaryError::Disabled) => None,
            Err(e) => {
                tracing::warn!(error = %e, "remote summarizer unavailable, using local extractor");
                None
            }
        };
        Self::new(primary, Arc::new(LocalExtractor))
    }

    pub fn local_only() -> Self {
        Self::new(None, Arc::new(LocalExtractor))
    }
}

#[async_trait]
impl Summarizer for SummaryChain {
    async fn summarize(&self, html: &str) -> Result<String, SummaryError> {
        if let Some(primary) = &self.primary {
            match primary.summarize(html).await {
                Ok(s) if !s.trim().is_empty() => return Ok(s),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(summarizer = primary.name(), error = %e, "primary summarizer failed");
                    counter!("summary_fallback_total").increment(1);
                }
            }
        }
        self.fallback.summarize(html).await
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
