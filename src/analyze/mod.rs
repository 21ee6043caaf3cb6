// src/analyze/mod.rs
//! Post-crawl analysis: near-duplicate collapse, keyword rules and ranking.

pub mod dedup;
pub mod keywords;
pub mod scoring;

// Re-export convenient types.
pub use crate::analyze::dedup::{Deduplicator, LexicalSimilarity, TitleSimilarity};
pub use crate::analyze::keywords::KeywordRule;
pub use crate::analyze::scoring::{score_and_rank, Scored};
