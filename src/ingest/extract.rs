// src/ingest/extract.rs
//! Article-body text extraction used for summarizer input and as the local
//! fallback summary.
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};

use crate::security::truncate_chars;

const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "aside", "header", "iframe", "noscript", "form",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article", "tr",
    "blockquote",
];

static MAIN_REGIONS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article",
        "main",
        ".content",
        ".article-content",
        "#content",
        ".post-content",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("p selector"));

/// Boilerplate that shows up in paragraph form on news sites.
const NOISE: &[&str] = &[
    "版权",
    "copyright",
    "责任编辑",
    "免责声明",
    "扫码",
    "关注我们",
    "点击",
    "转载",
    "all rights reserved",
    "subscribe",
    "cookie",
];

const MIN_PARAGRAPH_CHARS: usize = 20;

fn main_region(doc: &Html) -> ElementRef<'_> {
    MAIN_REGIONS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .or_else(|| doc.select(&BODY).next())
        .unwrap_or_else(|| doc.root_element())
}

fn is_skipped(el: &ElementRef<'_>) -> bool {
    SKIP_TAGS.contains(&el.value().name())
}

fn inside_skipped(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_skipped(&a))
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if is_skipped(&child_el) {
                        continue;
                    }
                    let block = BLOCK_TAGS.contains(&child_el.value().name());
                    if block {
                        out.push('\n');
                    }
                    collect_text(child_el, out);
                    if block {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Visible text of the main content region, one line per block, blank lines dropped.
pub fn main_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let region = main_region(&doc);
    let mut raw = String::new();
    collect_text(region, &mut raw);
    raw.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic summary: content paragraphs that pass the length and noise
/// filters, concatenated up to `budget` chars.
pub fn fallback_summary(html: &str, budget: usize) -> String {
    let doc = Html::parse_document(html);
    let region = main_region(&doc);

    let mut out = String::new();
    for p in region.select(&PARAGRAPH) {
        if inside_skipped(&p) {
            continue;
        }
        let text = p.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.chars().count() < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let lower = text.to_lowercase();
        if NOISE.iter().any(|n| lower.contains(n)) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
        if out.chars().count() >= budget {
            break;
        }
    }
    truncate_chars(&out, budget)
}
