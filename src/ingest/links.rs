// src/ingest/links.rs
//! Listing-page link extraction.
use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid selector {0:?}")]
    InvalidSelector(String),
    #[error("invalid base url: {0}")]
    InvalidBase(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub title: String,
    pub url: String,
}

const MIN_PATH_CHARS: usize = 5;
const MIN_TITLE_CHARS: usize = 4;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Apply `selector` to `html` and return article-looking links, absolute and
/// deduplicated (first occurrence wins). Containers matched by the selector are
/// searched for anchors.
pub fn extract_links(html: &str, base_url: &str, selector: &str) -> Result<Vec<ExtractedLink>, LinkError> {
    let sel = Selector::parse(selector).map_err(|_| LinkError::InvalidSelector(selector.to_string()))?;
    let base = Url::parse(base_url).map_err(|e| LinkError::InvalidBase(e.to_string()))?;
    let doc = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        if el.value().name() == "a" {
            push_anchor(el, &base, &mut seen, &mut out);
        } else {
            for a in el.select(&ANCHOR) {
                push_anchor(a, &base, &mut seen, &mut out);
            }
        }
    }
    Ok(out)
}

fn push_anchor(
    a: ElementRef<'_>,
    base: &Url,
    seen: &mut HashSet<String>,
    out: &mut Vec<ExtractedLink>,
) {
    let Some(href) = a.value().attr("href").map(str::trim) else {
        return;
    };
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return;
    }
    let Ok(mut abs) = base.join(href) else {
        return;
    };
    if !matches!(abs.scheme(), "http" | "https") {
        return;
    }
    if abs.path().chars().count() < MIN_PATH_CHARS {
        return;
    }
    let title = collapse_ws(&a.text().collect::<String>());
    if title.chars().count() < MIN_TITLE_CHARS {
        return;
    }
    abs.set_fragment(None);
    let url = abs.to_string();
    if seen.insert(url.clone()) {
        out.push(ExtractedLink { title, url });
    }
}

pub(crate) fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
