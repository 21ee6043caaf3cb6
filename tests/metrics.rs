// tests/metrics.rs
//
// Fallback and error counters show up with their HELP text on /metrics.
// One test per file: the Prometheus recorder is process-global.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use industry_digest::analyze::dedup::DedupError;
use industry_digest::analyze::{Deduplicator, TitleSimilarity};
use industry_digest::market::{fetch_quotes, QuoteError, QuoteFetcher};
use industry_digest::metrics::Metrics;
use industry_digest::model::{Candidate, MarketItem, MarketKind, Quote};

struct Unreachable;

#[async_trait]
impl TitleSimilarity for Unreachable {
    async fn similarity_matrix(&self, _titles: &[String]) -> Result<Vec<Vec<f32>>, DedupError> {
        Err(DedupError::Unavailable("embedding endpoint down".into()))
    }
    fn name(&self) -> &'static str {
        "unreachable"
    }
}

#[async_trait]
impl QuoteFetcher for Unreachable {
    async fn fetch(&self, item: &MarketItem) -> Result<Quote, QuoteError> {
        Err(QuoteError::Http(format!("{} timed out", item.symbol)))
    }
}

fn candidate(title: &str) -> Candidate {
    Candidate {
        title: title.into(),
        url: format!("https://wire.example.com/{}", title.len()),
        published_at: Utc::now(),
        source_id: 1,
        source_name: "Wire".into(),
        source_weight: 5,
        source_keywords: None,
        summary: String::new(),
    }
}

#[tokio::test]
async fn fallback_and_quote_error_counters_are_described() {
    let metrics = Metrics::init().expect("first recorder in this process");

    let dedup = Deduplicator::new(Arc::new(Unreachable), 0.85);
    let kept = dedup
        .dedup(vec![candidate("Copper rallies"), candidate("Copper rallies")])
        .await;
    assert_eq!(kept.len(), 1);

    let fetcher: Arc<dyn QuoteFetcher> = Arc::new(Unreachable);
    let item = MarketItem {
        id: 1,
        industry_id: 1,
        name: "Moutai".into(),
        symbol: "600519".into(),
        kind: MarketKind::Stock,
    };
    assert!(fetch_quotes(&fetcher, &[item]).await.is_empty());

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "# HELP dedup_fallback_total",
        "dedup_fallback_total 1",
        "# HELP quote_fetch_errors_total",
        "quote_fetch_errors_total 1",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
    }
}
