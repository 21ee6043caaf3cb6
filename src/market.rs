// src/market.rs
//! Market quotes for the evening digest. Each symbol is fetched on its own and
//! may fail without affecting the others.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{MarketItem, MarketKind, Quote};

const EASTMONEY_QUOTE_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("quote_fetch_errors_total", "Market symbols whose quote could not be fetched.");
    });
}

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("cannot map symbol {0:?} to a market id")]
    UnknownSymbol(String),
    #[error("futures symbol {0:?} has an unknown exchange; configure it as market.code, e.g. 113.cu2505")]
    UnknownFuturesExchange(String),
    #[error("quote request failed: {0}")]
    Http(String),
    #[error("no quote data for {0}")]
    NotFound(String),
    #[error("invalid price for {0}")]
    InvalidPrice(String),
}

#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch(&self, item: &MarketItem) -> Result<Quote, QuoteError>;
}

/// Fetch every item concurrently; failures are logged and skipped.
pub async fn fetch_quotes(fetcher: &Arc<dyn QuoteFetcher>, items: &[MarketItem]) -> Vec<Quote> {
    ensure_metrics_described();
    let results = join_all(items.iter().map(|it| fetcher.fetch(it))).await;
    items
        .iter()
        .zip(results)
        .filter_map(|(item, r)| match r {
            Ok(q) => Some(q),
            Err(e) => {
                counter!("quote_fetch_errors_total").increment(1);
                tracing::warn!(symbol = %item.symbol, kind = item.kind.as_str(), error = %e, "quote fetch failed");
                None
            }
        })
        .collect()
}

/// Eastmoney futures market ids by commodity prefix.
const FUTURES_EXCHANGES: &[(&str, u32)] = &[
    // Shanghai Futures Exchange
    ("cu", 113),
    ("al", 113),
    ("zn", 113),
    ("ni", 113),
    ("au", 113),
    ("ag", 113),
    // Guangzhou Futures Exchange
    ("lc", 225),
    ("si", 225),
];

/// Eastmoney `secid`: `market.code`. Shanghai codes start with 6 or 9, Hong Kong
/// uses market 116. Futures map by commodity prefix (`cu2505` -> `113.cu2505`);
/// anything else needs its market prefix spelled out.
pub fn eastmoney_secid(item: &MarketItem) -> Result<String, QuoteError> {
    let symbol = item.symbol.trim();
    if symbol.contains('.') {
        return Ok(symbol.to_string());
    }
    if symbol.is_empty() {
        return Err(QuoteError::UnknownSymbol(item.symbol.clone()));
    }
    match item.kind {
        MarketKind::Stock => {
            let market = if symbol.starts_with('6') || symbol.starts_with('9') {
                1
            } else {
                0
            };
            Ok(format!("{market}.{symbol}"))
        }
        MarketKind::StockHk => Ok(format!("116.{symbol}")),
        MarketKind::Futures => {
            let code = symbol.to_ascii_lowercase();
            let prefix: String = code.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
            FUTURES_EXCHANGES
                .iter()
                .find(|(p, _)| *p == prefix)
                .map(|(_, market)| format!("{market}.{code}"))
                .ok_or_else(|| QuoteError::UnknownFuturesExchange(item.symbol.clone()))
        }
    }
}

pub struct EastmoneyQuoteFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl EastmoneyQuoteFetcher {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(EASTMONEY_QUOTE_URL)
    }

    pub fn with_base_url(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::ingest::fetch::BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResp {
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    /// Last price.
    f43: serde_json::Value,
    /// Display name.
    f58: Option<String>,
    /// Change percent.
    f170: serde_json::Value,
}

fn as_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Turn an API body into a quote; the configured display name wins.
fn parse_quote(item: &MarketItem, body: QuoteResp) -> Result<Quote, QuoteError> {
    let data = body
        .data
        .ok_or_else(|| QuoteError::NotFound(item.symbol.clone()))?;
    let price = as_number(&data.f43)
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| QuoteError::InvalidPrice(item.symbol.clone()))?;
    let change_pct = as_number(&data.f170).unwrap_or(0.0);
    let name = if item.name.trim().is_empty() {
        data.f58.unwrap_or_else(|| item.symbol.clone())
    } else {
        item.name.clone()
    };
    Ok(Quote {
        name,
        symbol: item.symbol.clone(),
        price: (price * 100.0).round() / 100.0,
        change_pct: (change_pct * 100.0).round() / 100.0,
        kind: item.kind,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl QuoteFetcher for EastmoneyQuoteFetcher {
    async fn fetch(&self, item: &MarketItem) -> Result<Quote, QuoteError> {
        let secid = eastmoney_secid(item)?;
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("secid", secid.as_str()),
                ("fields", "f43,f57,f58,f170"),
                ("fltt", "2"),
            ])
            .send()
            .await
            .map_err(|e| QuoteError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(QuoteError::Http(format!("HTTP {}", resp.status())));
        }
        let body: QuoteResp = resp
            .json()
            .await
            .map_err(|e| QuoteError::Http(e.to_string()))?;
        parse_quote(item, body)
    }
}
