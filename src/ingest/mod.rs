// src/ingest/mod.rs
//! Crawl & extraction: listing fetch, link extraction, seen-filtering and
//! summary enrichment across all sources of one industry.
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod links;
pub mod summary;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;

use crate::model::{Candidate, Source};
use crate::store::Store;
use fetch::{FetchError, PageFetcher};
use links::LinkError;
use summary::Summarizer;

pub use fetch::{FetchedPage, HttpFetcher, RetryPolicy};
pub use summary::SummaryChain;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "crawl_source_errors_total",
            "Sources whose listing could not be fetched or parsed."
        );
        describe_counter!(
            "crawl_articles_new_total",
            "Articles found that were not delivered before."
        );
        describe_counter!(
            "crawl_fetch_retries_total",
            "HTTP fetch attempts repeated after a retryable failure."
        );
        describe_counter!(
            "summary_fallback_total",
            "Summaries produced by the local extractor after the primary failed."
        );
    });
}

#[derive(Debug, thiserror::Error)]
enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Links(#[from] LinkError),
    #[error("seen lookup failed: {0}")]
    Store(String),
}

/// Link found on a listing page before enrichment.
struct Listed {
    title: String,
    url: String,
    published_at: DateTime<Utc>,
}

pub struct CrawlEngine {
    fetcher: Arc<dyn PageFetcher>,
    summarizer: Arc<dyn Summarizer>,
    store: Store,
    detail_concurrency: usize,
}

impl CrawlEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        summarizer: Arc<dyn Summarizer>,
        store: Store,
        detail_concurrency: usize,
    ) -> Self {
        ensure_metrics_described();
        Self {
            fetcher,
            summarizer,
            store,
            detail_concurrency: detail_concurrency.max(1),
        }
    }

    /// Undelivered articles from every source. A failing source contributes
    /// nothing and does not affect the others. Nothing is written to the
    /// delivery history here.
    pub async fn crawl(&self, sources: &[Source], now: DateTime<Utc>) -> Vec<Candidate> {
        let details = Arc::new(Semaphore::new(self.detail_concurrency));
        let per_source = join_all(
            sources
                .iter()
                .map(|src| self.crawl_source(src, now, details.clone())),
        )
        .await;

        let mut seen_urls = HashSet::new();
        let mut out = Vec::new();
        for (src, result) in sources.iter().zip(per_source) {
            match result {
                Ok(items) => {
                    for item in items {
                        if seen_urls.insert(item.url.clone()) {
                            out.push(item);
                        }
                    }
                }
                Err(e) => {
                    counter!("crawl_source_errors_total").increment(1);
                    tracing::warn!(source = %src.name, url = %src.url, error = %e, "source crawl failed");
                }
            }
        }
        out
    }

    async fn crawl_source(
        &self,
        src: &Source,
        now: DateTime<Utc>,
        details: Arc<Semaphore>,
    ) -> Result<Vec<Candidate>, SourceError> {
        let page = self.fetcher.fetch(&src.url).await?;
        let listed = list_articles(&page, src.selector(), now)?;
        let found = listed.len();

        let urls: Vec<String> = listed.iter().map(|l| l.url.clone()).collect();
        let already = self
            .store
            .seen_urls(&urls)
            .await
            .map_err(|e| SourceError::Store(e.to_string()))?;
        let fresh: Vec<Listed> = listed
            .into_iter()
            .filter(|l| !already.contains(&l.url))
            .collect();
        counter!("crawl_articles_new_total").increment(fresh.len() as u64);
        tracing::info!(source = %src.name, found, new = fresh.len(), "source crawled");

        let enriched = join_all(fresh.into_iter().map(|l| {
            let details = details.clone();
            async move {
                let summary = self.enrich(&l.url, &details).await;
                Candidate {
                    title: l.title,
                    url: l.url,
                    published_at: l.published_at,
                    source_id: src.id,
                    source_name: src.name.clone(),
                    source_weight: src.weight,
                    source_keywords: src.keywords.clone(),
                    summary,
                }
            }
        }))
        .await;
        Ok(enriched)
    }

    /// Detail fetch + summary. Any failure yields an empty summary.
    async fn enrich(&self, url: &str, details: &Semaphore) -> String {
        let html = {
            let Ok(_permit) = details.acquire().await else {
                return String::new();
            };
            match self.fetcher.fetch(url).await {
                Ok(page) => page.body,
                Err(e) => {
                    tracing::debug!(url, error = %e, "detail fetch failed");
                    return String::new();
                }
            }
        };
        match self.summarizer.summarize(&html).await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(url, error = %e, "no summary");
                String::new()
            }
        }
    }
}

/// How many article links a listing page yields for `selector`.
pub fn listing_link_count(page: &FetchedPage, selector: &str) -> Result<usize, LinkError> {
    list_articles(page, selector, Utc::now()).map(|l| l.len())
}

/// Feed items when the listing is RSS/Atom, selector links otherwise.
fn list_articles(page: &FetchedPage, selector: &str, now: DateTime<Utc>) -> Result<Vec<Listed>, LinkError> {
    if feed::looks_like_feed(&page.body, page.content_type.as_deref()) {
        if let Some(items) = feed::parse_feed(&page.body) {
            let mut seen = HashSet::new();
            return Ok(items
                .into_iter()
                .filter(|i| seen.insert(i.url.clone()))
                .map(|i| Listed {
                    title: i.title,
                    url: i.url,
                    published_at: i.published_at.unwrap_or(now),
                })
                .collect());
        }
    }
    Ok(links::extract_links(&page.body, &page.url, selector)?
        .into_iter()
        .map(|l| Listed {
            title: l.title,
            url: l.url,
            published_at: now,
        })
        .collect())
}
