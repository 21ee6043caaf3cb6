// src/ingest/feed.rs
//! RSS 2.0 / Atom listing support. A source whose listing URL serves a feed
//! yields the feed's items instead of selector-extracted links.
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use super::links::collapse_ws;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}
#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Cheap check on the first bytes of a response.
pub fn looks_like_feed(body: &str, content_type: Option<&str>) -> bool {
    let ct_xml = content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("rss") || ct.contains("atom") || ct.contains("/xml")
        })
        .unwrap_or(false);
    let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    let head_feed = head.contains("<rss") || head.contains("<feed");
    head_feed || (ct_xml && head.starts_with("<?xml") && head.contains("<channel"))
}

/// Parse RSS or Atom. `None` when the body is neither.
pub fn parse_feed(body: &str) -> Option<Vec<FeedItem>> {
    let xml = scrub_html_entities_for_xml(body);
    if let Ok(rss) = from_str::<Rss>(&xml) {
        return Some(
            rss.channel
                .items
                .into_iter()
                .filter_map(|it| {
                    feed_item(
                        it.title.as_deref().unwrap_or_default(),
                        it.link.as_deref().unwrap_or_default(),
                        it.pub_date.as_deref().and_then(parse_rfc2822),
                    )
                })
                .collect(),
        );
    }
    if let Ok(atom) = from_str::<Atom>(&xml) {
        return Some(
            atom.entries
                .into_iter()
                .filter_map(|e| {
                    let href = e
                        .links
                        .iter()
                        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                        .or_else(|| e.links.first())
                        .and_then(|l| l.href.clone())
                        .unwrap_or_default();
                    let ts = e
                        .published
                        .as_deref()
                        .or(e.updated.as_deref())
                        .and_then(parse_rfc3339);
                    feed_item(e.title.map(|t| t.value).as_deref().unwrap_or_default(), &href, ts)
                })
                .collect(),
        );
    }
    None
}

fn feed_item(title: &str, link: &str, published_at: Option<DateTime<Utc>>) -> Option<FeedItem> {
    let title = collapse_ws(&html_escape::decode_html_entities(title));
    let link = link.trim();
    if title.is_empty() || !(link.starts_with("http://") || link.starts_with("https://")) {
        return None;
    }
    Some(FeedItem {
        title,
        url: link.to_string(),
        published_at,
    })
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
}
