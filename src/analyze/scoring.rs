//! Composite ranking of candidates.
//!
//! score = 0.4 * timeliness + 0.3 * weight + 0.3 * keyword
//! - timeliness: linear decay from 1.0 (just published) to 0.0 at 24h
//! - weight: source weight 1..=10 mapped onto 0.1..=1.0
//! - keyword: source rule bonus ratio, 0.5 when neutral

use chrono::{DateTime, Utc};

use super::keywords::{KeywordRule, NEUTRAL_KEYWORD_SCORE};
use crate::model::Candidate;

pub const W_TIMELINESS: f32 = 0.4;
pub const W_WEIGHT: f32 = 0.3;
pub const W_KEYWORD: f32 = 0.3;

const DECAY_HOURS: f32 = 24.0;

pub fn timeliness(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let age_hours = (now - published_at).num_seconds() as f32 / 3600.0;
    (1.0 - age_hours / DECAY_HOURS).clamp(0.0, 1.0)
}

pub fn weight_score(weight: i64) -> f32 {
    (weight as f32 / 10.0).clamp(0.1, 1.0)
}

/// Keyword part of the score, `None` when the source rule filters the title out.
pub fn keyword_score(c: &Candidate) -> Option<f32> {
    match KeywordRule::parse_opt(c.source_keywords.as_deref()) {
        None => Some(NEUTRAL_KEYWORD_SCORE),
        Some(rule) => rule.source_score(&c.title),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f32,
}

/// Filter (industry rule, then source rules), score, and return the best
/// `top_n` in descending score order. Equal scores keep input order.
pub fn score_and_rank(
    items: Vec<Candidate>,
    top_n: usize,
    industry_rule: Option<&KeywordRule>,
    now: DateTime<Utc>,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = items
        .into_iter()
        .filter(|c| match industry_rule {
            Some(rule) => rule.admits_industry(&format!("{} {}", c.title, c.summary)),
            None => true,
        })
        .filter_map(|c| {
            let kw = keyword_score(&c)?;
            let score = W_TIMELINESS * timeliness(c.published_at, now)
                + W_WEIGHT * weight_score(c.source_weight)
                + W_KEYWORD * kw;
            Some(Scored { candidate: c, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_n);
    scored
}
