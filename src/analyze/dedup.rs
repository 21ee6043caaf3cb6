// src/analyze/dedup.rs
//! Near-duplicate title collapse across sources.
//!
//! Greedy keep-first: an item is dropped when its similarity to any already
//! kept item reaches the threshold. If the similarity backend fails, titles are
//! matched exactly instead; order is preserved either way.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use thiserror::Error;

use crate::config::AiSettings;
use crate::model::Candidate;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dedup_fallback_total",
            "Dedup runs that fell back to exact title matching."
        );
    });
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("similarity backend unavailable: {0}")]
    Unavailable(String),
    #[error("similarity backend returned malformed data: {0}")]
    Malformed(String),
}

/// Pairwise title similarity in [0,1]; `matrix[i][j]` compares titles i and j.
#[async_trait]
pub trait TitleSimilarity: Send + Sync {
    async fn similarity_matrix(&self, titles: &[String]) -> Result<Vec<Vec<f32>>, DedupError>;

    fn name(&self) -> &'static str;
}

/// Edit-distance similarity on normalized titles. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

fn normalize_title(t: &str) -> String {
    t.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[async_trait]
impl TitleSimilarity for LexicalSimilarity {
    async fn similarity_matrix(&self, titles: &[String]) -> Result<Vec<Vec<f32>>, DedupError> {
        let norm: Vec<String> = titles.iter().map(|t| normalize_title(t)).collect();
        Ok(norm
            .iter()
            .map(|a| {
                norm.iter()
                    .map(|b| normalized_levenshtein(a, b) as f32)
                    .collect()
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

/// Cosine similarity of title embeddings from an OpenAI-compatible endpoint.
pub struct EmbeddingSimilarity {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl EmbeddingSimilarity {
    pub fn new(settings: &AiSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .ok()?;
        Some(Self {
            http,
            api_base: settings.api_base.clone(),
            api_key,
            model: settings.embedding_model.clone(),
        })
    }

    async fn embed(&self, titles: &[String]) -> Result<Vec<Vec<f32>>, DedupError> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            index: usize,
            embedding: Vec<f32>,
        }

        let resp = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                input: titles,
            })
            .send()
            .await
            .map_err(|e| DedupError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DedupError::Unavailable(format!("HTTP {}", resp.status())));
        }
        let mut body: Resp = resp
            .json()
            .await
            .map_err(|e| DedupError::Malformed(e.to_string()))?;
        if body.data.len() != titles.len() {
            return Err(DedupError::Malformed(format!(
                "expected {} embeddings, got {}",
                titles.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|i| i.index);
        Ok(body.data.into_iter().map(|i| i.embedding).collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[async_trait]
impl TitleSimilarity for EmbeddingSimilarity {
    async fn similarity_matrix(&self, titles: &[String]) -> Result<Vec<Vec<f32>>, DedupError> {
        let vecs = self.embed(titles).await?;
        Ok(vecs
            .iter()
            .map(|a| vecs.iter().map(|b| cosine(a, b)).collect())
            .collect())
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

pub struct Deduplicator {
    backend: Arc<dyn TitleSimilarity>,
    threshold: f32,
}

impl Deduplicator {
    pub fn new(backend: Arc<dyn TitleSimilarity>, threshold: f32) -> Self {
        ensure_metrics_described();
        Self {
            backend,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Embeddings when an AI key is configured, edit distance otherwise.
    pub fn from_settings(settings: &AiSettings, threshold: f32) -> Self {
        let backend: Arc<dyn TitleSimilarity> = match EmbeddingSimilarity::new(settings) {
            Some(e) => Arc::new(e),
            None => Arc::new(LexicalSimilarity),
        };
        Self::new(backend, threshold)
    }

    pub async fn dedup(&self, items: Vec<Candidate>) -> Vec<Candidate> {
        if items.len() < 2 {
            return items;
        }
        let titles: Vec<String> = items.iter().map(|c| c.title.clone()).collect();
        let before = items.len();
        let out = match self.backend.similarity_matrix(&titles).await {
            Ok(m) if m.len() == titles.len() && m.iter().all(|row| row.len() == titles.len()) => {
                keep_first(items, &m, self.threshold)
            }
            Ok(_) => {
                self.fell_back("matrix shape mismatch");
                exact_dedup(items)
            }
            Err(e) => {
                self.fell_back(&e.to_string());
                exact_dedup(items)
            }
        };
        if out.len() < before {
            tracing::info!(removed = before - out.len(), kept = out.len(), "duplicates removed");
        }
        out
    }

    fn fell_back(&self, reason: &str) {
        counter!("dedup_fallback_total").increment(1);
        tracing::warn!(backend = self.backend.name(), reason, "similarity dedup failed, using exact titles");
    }
}

fn keep_first(items: Vec<Candidate>, m: &[Vec<f32>], threshold: f32) -> Vec<Candidate> {
    let mut kept: Vec<usize> = Vec::new();
    let mut exact = HashSet::new();
    let mut out = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let dup = !exact.insert(item.title.clone()) || kept.iter().any(|&j| m[i][j] >= threshold);
        if !dup {
            kept.push(i);
            out.push(item);
        }
    }
    out
}

pub fn exact_dedup(items: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|c| seen.insert(c.title.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cand(title: &str, n: usize) -> Candidate {
        Candidate {
            title: title.into(),
            url: format!("https://x.example.com/{n}"),
            published_at: Utc::now(),
            source_id: n as i64,
            source_name: "Wire".into(),
            source_weight: 5,
            source_keywords: None,
            summary: String::new(),
        }
    }

    struct Broken;

    #[async_trait]
    impl TitleSimilarity for Broken {
        async fn similarity_matrix(&self, _t: &[String]) -> Result<Vec<Vec<f32>>, DedupError> {
            Err(DedupError::Unavailable("model download failed".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn lexical_keeps_first_of_near_duplicates() {
        let d = Deduplicator::new(Arc::new(LexicalSimilarity), 0.85);
        let out = d
            .dedup(vec![
                cand("TSMC raises capex guidance for 2024", 1),
                cand("Memory prices fall again", 2),
                cand("TSMC raises capex guidance for 2024.", 3),
            ])
            .await;
        let urls: Vec<_> = out.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.example.com/1", "https://x.example.com/2"]);
    }

    #[tokio::test]
    async fn dedup_is_idempotent() {
        let d = Deduplicator::new(Arc::new(LexicalSimilarity), 0.85);
        let input = vec![
            cand("Chip exports rise in May", 1),
            cand("Chip exports rise in May!", 2),
            cand("Foundry opens new line", 3),
            cand("Foundry opens a new line", 4),
            cand("Unrelated steel story", 5),
        ];
        let once = d.dedup(input).await;
        let twice = d.dedup(once.clone()).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_exact_titles() {
        let d = Deduplicator::new(Arc::new(Broken), 0.85);
        let out = d
            .dedup(vec![
                cand("Same title", 1),
                cand("Same title!", 2),
                cand("Same title", 3),
            ])
            .await;
        let urls: Vec<_> = out.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.example.com/1", "https://x.example.com/2"]);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
