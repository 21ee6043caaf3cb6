// src/analyze/keywords.rs
//! Keyword rule grammar: whitespace-separated tokens, `+term` required,
//! `!term` forbidden, plain terms are bonus. Matching is case-insensitive substring.

/// Parsed rule. Terms are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordRule {
    pub required: Vec<String>,
    pub forbidden: Vec<String>,
    pub bonus: Vec<String>,
}

/// Neutral keyword score for sources without a rule, or with a rule that has
/// no bonus terms.
pub const NEUTRAL_KEYWORD_SCORE: f32 = 0.5;

impl KeywordRule {
    pub fn parse(rule: &str) -> Self {
        let mut out = KeywordRule::default();
        for token in rule.split_whitespace() {
            let token = token.to_lowercase();
            if let Some(term) = token.strip_prefix('+') {
                if !term.is_empty() {
                    out.required.push(term.to_string());
                }
            } else if let Some(term) = token.strip_prefix('!') {
                if !term.is_empty() {
                    out.forbidden.push(term.to_string());
                }
            } else {
                out.bonus.push(token);
            }
        }
        out
    }

    /// `None` for an absent or blank rule string.
    pub fn parse_opt(rule: Option<&str>) -> Option<Self> {
        let rule = rule?.trim();
        if rule.is_empty() {
            return None;
        }
        let parsed = Self::parse(rule);
        (!parsed.is_empty()).then_some(parsed)
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.forbidden.is_empty() && self.bonus.is_empty()
    }

    fn hits_forbidden(&self, lower: &str) -> bool {
        self.forbidden.iter().any(|t| lower.contains(t.as_str()))
    }

    /// Industry-level gate: no forbidden hit, and at least one required term
    /// when any are configured.
    pub fn admits_industry(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        if self.hits_forbidden(&lower) {
            return false;
        }
        self.required.is_empty() || self.required.iter().any(|t| lower.contains(t.as_str()))
    }

    /// Source-level score in [0,1], or `None` when the title is filtered out
    /// (forbidden hit or a required term missing).
    pub fn source_score(&self, title: &str) -> Option<f32> {
        let lower = title.to_lowercase();
        if self.hits_forbidden(&lower) {
            return None;
        }
        if !self.required.iter().all(|t| lower.contains(t.as_str())) {
            return None;
        }
        if self.bonus.is_empty() {
            return Some(NEUTRAL_KEYWORD_SCORE);
        }
        let hits = self
            .bonus
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .count();
        Some(hits as f32 / self.bonus.len() as f32)
    }
}
