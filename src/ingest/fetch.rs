// src/ingest/fetch.rs
//! Guarded HTTP GET with retry/backoff and charset normalization.
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::security::{UnsafeTarget, UrlGuard};

pub const MAX_REDIRECTS: usize = 5;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsafe target: {0}")]
    Unsafe(#[from] UnsafeTarget),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
}

impl FetchError {
    /// Timeouts, connection failures and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Status(code) => *code >= 500,
            FetchError::Unsafe(_) | FetchError::Body(_) | FetchError::TooManyRedirects(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// Anything that can turn a URL into a decoded page. The crawler and the
/// health monitor only see this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    guard: UrlGuard,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(guard: UrlGuard, timeout: Duration) -> anyhow::Result<Self> {
        // Redirects are followed by hand so every hop is resolved and checked.
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            guard,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get(&self, url: &url::Url) -> Result<reqwest::Response, FetchError> {
        self.client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(reqwest::header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(classify)
    }

    /// One attempt starting from an already validated URL.
    async fn fetch_once(&self, start: &url::Url) -> Result<FetchedPage, FetchError> {
        let mut current = start.clone();
        let mut hops = 0;
        let resp = loop {
            let resp = self.get(&current).await?;
            if !resp.status().is_redirection() {
                break resp;
            }
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let Some(location) = location else {
                break resp;
            };
            if hops >= MAX_REDIRECTS {
                return Err(FetchError::TooManyRedirects(hops));
            }
            let next = current
                .join(&location)
                .map_err(|e| UnsafeTarget::InvalidUrl(e.to_string()))?;
            tracing::debug!(from = %current, to = %next, "following redirect");
            current = self.guard.validate(next.as_str()).await?;
            hops += 1;
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchedPage {
            url: final_url,
            body: decode_body(&bytes, content_type.as_deref()),
            content_type,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let start = self.guard.validate(url).await?;

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(&start).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(url, attempt, error = %e, ?delay, "fetch failed, retrying");
                    counter!("crawl_fetch_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Network(e.to_string())
    }
}

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_\-:]+)"#).expect("charset regex")
});

/// Decode with the charset from Content-Type, else the one declared in a
/// `<meta>` tag, else UTF-8. A BOM wins over both.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(charset_from_content_type)
        .or_else(|| sniff_meta_charset(bytes));
    let encoding = declared
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn charset_from_content_type(ct: &str) -> Option<String> {
    ct.split(';').skip(1).find_map(|part| {
        let (k, v) = part.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| v.trim().trim_matches('"').to_string())
    })
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(4096)];
    let head = String::from_utf8_lossy(head);
    META_CHARSET
        .captures(&head)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Unsafe(UnsafeTarget::NoHost).is_retryable());
        assert!(!FetchError::TooManyRedirects(MAX_REDIRECTS).is_retryable());
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn decodes_gbk_from_header_and_meta() {
        let (gbk, _, _) = encoding_rs::GBK.encode("半导体新闻");
        assert_eq!(decode_body(&gbk, Some("text/html; charset=GBK")), "半导体新闻");

        let mut doc = b"<html><head><meta charset=\"gb2312\"></head><body>".to_vec();
        doc.extend_from_slice(&gbk);
        let text = decode_body(&doc, Some("text/html"));
        assert!(text.contains("半导体新闻"));
    }

    #[test]
    fn utf8_is_default() {
        assert_eq!(decode_body("新闻".as_bytes(), None), "新闻");
        assert_eq!(
            charset_from_content_type("text/html; Charset=\"utf-8\"").as_deref(),
            Some("utf-8")
        );
    }
}
