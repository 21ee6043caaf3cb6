// tests/push_e2e.rs
//
// End-to-end runs of the push orchestrator against an in-memory store, with
// every network collaborator replaced by an in-test fake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use industry_digest::analyze::{Deduplicator, LexicalSimilarity};
use industry_digest::config::seed::SeedFile;
use industry_digest::ingest::fetch::{FetchError, PageFetcher};
use industry_digest::ingest::summary::{Summarizer, SummaryError};
use industry_digest::ingest::{CrawlEngine, FetchedPage};
use industry_digest::market::{QuoteError, QuoteFetcher};
use industry_digest::model::{
    Candidate, MarketItem, PushKind, PushStatus, Quote, SmtpConfig, TriggerSource,
};
use industry_digest::notify::{MailError, Mailer};
use industry_digest::push::{FailureStreaks, PushOrchestrator, PushOutcome, SkipReason};
use industry_digest::security::CredentialCipher;
use industry_digest::store::Store;

// ---------- fakes ----------

/// Listing pages by URL; `None` simulates a timeout. Unknown URLs are detail pages.
struct FakeWeb {
    pages: HashMap<String, Option<String>>,
    calls: AtomicUsize,
}

impl FakeWeb {
    fn new(pages: &[(&str, Option<&str>)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.map(str::to_string)))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageFetcher for FakeWeb {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match self.pages.get(url) {
            Some(Some(body)) => body.clone(),
            Some(None) => return Err(FetchError::Timeout),
            None => "<html><body><article><p>Detail page body.</p></article></body></html>".into(),
        };
        Ok(FetchedPage {
            url: url.to_string(),
            content_type: Some("text/html; charset=utf-8".into()),
            body,
        })
    }
}

struct FixedSummary;

#[async_trait]
impl Summarizer for FixedSummary {
    async fn summarize(&self, _html: &str) -> Result<String, SummaryError> {
        Ok("short summary".into())
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Clone, Copy, PartialEq)]
enum MailMode {
    Send,
    RenderEmpty,
    Fail,
}

struct FakeMailer {
    mode: Mutex<MailMode>,
    sent: AtomicUsize,
    alerts: AtomicUsize,
    last_items: Mutex<Vec<String>>,
}

impl FakeMailer {
    fn new(mode: MailMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            sent: AtomicUsize::new(0),
            alerts: AtomicUsize::new(0),
            last_items: Mutex::new(Vec::new()),
        }
    }

    fn set_mode(&self, mode: MailMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn outcome(&self, html: String) -> Result<String, MailError> {
        match *self.mode.lock().unwrap() {
            MailMode::Send => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(html)
            }
            MailMode::RenderEmpty => Ok(String::new()),
            MailMode::Fail => Err(MailError::Transport("connection refused".into())),
        }
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_morning(
        &self,
        _smtp: &SmtpConfig,
        _recipients: &[String],
        industry: &str,
        items: &[Candidate],
    ) -> Result<String, MailError> {
        *self.last_items.lock().unwrap() = items.iter().map(|c| c.url.clone()).collect();
        self.outcome(format!("<h2>{industry}</h2><p>{} items</p>", items.len()))
    }

    async fn send_evening(
        &self,
        _smtp: &SmtpConfig,
        _recipients: &[String],
        industry: &str,
        quotes: &[Quote],
    ) -> Result<String, MailError> {
        self.outcome(format!("<h2>{industry}</h2><p>{} quotes</p>", quotes.len()))
    }

    async fn send_alert(&self, _smtp: &SmtpConfig, _subject: &str, _html: &str) -> Result<(), MailError> {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeQuotes;

#[async_trait]
impl QuoteFetcher for FakeQuotes {
    async fn fetch(&self, item: &MarketItem) -> Result<Quote, QuoteError> {
        if item.symbol.starts_with("bad") {
            return Err(QuoteError::NotFound(item.symbol.clone()));
        }
        Ok(Quote {
            name: item.name.clone(),
            symbol: item.symbol.clone(),
            price: 12.34,
            change_pct: -0.5,
            kind: item.kind,
            fetched_at: Utc::now(),
        })
    }
}

// ---------- harness ----------

const LISTING_A: &str = r#"<html><body><ul>
  <li><a href="/news/2024/fab-expansion">Chip fab expansion announced</a></li>
  <li><a href="/news/2024/memory-prices">Memory prices rise sharply</a></li>
  <li><a href="/">Home</a></li>
</ul></body></html>"#;

const LISTING_B: &str = r#"<html><body>
  <a href="https://b.example.com/story/lithography-tools">Lithography tool orders surge</a>
</body></html>"#;

struct Harness {
    store: Store,
    web: Arc<FakeWeb>,
    mailer: Arc<FakeMailer>,
    orchestrator: PushOrchestrator,
    industry_id: i64,
}

async fn harness(seed_toml: &str, web: FakeWeb, mode: MailMode) -> Harness {
    let store = Store::in_memory().await.unwrap();
    let seed: SeedFile = toml::from_str(seed_toml).unwrap();
    let cipher = CredentialCipher::from_env_or_ephemeral(None).unwrap();
    store.apply_seed(&seed, &cipher).await.unwrap();
    let industry_id = store.industries().await.unwrap()[0].id;

    let web = Arc::new(web);
    let mailer = Arc::new(FakeMailer::new(mode));
    let crawler = CrawlEngine::new(web.clone(), Arc::new(FixedSummary), store.clone(), 5);
    let orchestrator = PushOrchestrator::new(
        store.clone(),
        crawler,
        Deduplicator::new(Arc::new(LexicalSimilarity), 0.85),
        mailer.clone(),
        Arc::new(FakeQuotes),
        Arc::new(FailureStreaks::new()),
    );
    Harness {
        store,
        web,
        mailer,
        orchestrator,
        industry_id,
    }
}

const SMTP: &str = r#"
[smtp]
host = "smtp.example.com"
username = "bot@example.com"
password = "app-password"
"#;

fn one_source_seed() -> String {
    format!(
        r#"{SMTP}
[[industries]]
name = "Semiconductors"
top_n = 5

[[industries.sources]]
name = "Wire A"
url = "https://a.example.com/list"

[[industries.recipients]]
email = "reader@example.com"
"#
    )
}

// ---------- scenarios ----------

#[tokio::test]
async fn scenario_a_success_records_delivered_urls() {
    let h = harness(
        &one_source_seed(),
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Send,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .expect("industry exists");
    match &outcome {
        PushOutcome::Succeeded(stats) => {
            assert_eq!(stats.article_count, 2);
            assert_eq!(stats.recipient_count, 1);
        }
        other => panic!("expected success, got {other:?}"),
    }

    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, PushStatus::Success);
    assert_eq!(audits[0].article_count, 2);
    assert_eq!(audits[0].triggered_by, "scheduler");
    assert!(audits[0].html_snapshot.as_deref().unwrap().contains("2 items"));

    assert_eq!(h.store.seen_count().await.unwrap(), 2);
    let seen = h
        .store
        .seen_urls(&[
            "https://a.example.com/news/2024/fab-expansion".into(),
            "https://a.example.com/news/2024/memory-prices".into(),
        ])
        .await
        .unwrap();
    assert_eq!(seen.len(), 2);
}

#[tokio::test]
async fn delivered_urls_never_come_back() {
    let h = harness(
        &one_source_seed(),
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Send,
    )
    .await;

    let first = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(first.status(), PushStatus::Success);

    let second = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Manual)
        .await
        .unwrap();
    assert_eq!(second, PushOutcome::Skipped(SkipReason::NothingNew));
    assert_eq!(h.mailer.sent.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.seen_count().await.unwrap(), 2);

    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].status, PushStatus::Skipped);
    assert_eq!(audits[0].triggered_by, "manual");
}

#[tokio::test]
async fn scenario_b_empty_render_is_skipped_without_commit() {
    let h = harness(
        &one_source_seed(),
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::RenderEmpty,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Skipped(SkipReason::NothingSent));
    assert_eq!(h.store.seen_count().await.unwrap(), 0);

    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, PushStatus::Skipped);
    assert!(audits[0].html_snapshot.is_none());
}

#[tokio::test]
async fn scenario_c_missing_recipients_skips_before_any_fetch() {
    let seed = format!(
        r#"{SMTP}
[[industries]]
name = "Semiconductors"

[[industries.sources]]
name = "Wire A"
url = "https://a.example.com/list"
"#
    );
    let h = harness(
        &seed,
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Send,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Skipped(SkipReason::NoRecipients));
    assert_eq!(h.web.calls.load(Ordering::SeqCst), 0);

    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, PushStatus::Skipped);
    assert!(audits[0].error.as_deref().unwrap().contains("recipients"));
}

#[tokio::test]
async fn missing_smtp_and_sources_are_distinct_skips() {
    let seed = r#"
[[industries]]
name = "Semiconductors"

[[industries.sources]]
name = "Wire A"
url = "https://a.example.com/list"

[[industries.recipients]]
email = "reader@example.com"
"#;
    let h = harness(seed, FakeWeb::new(&[]), MailMode::Send).await;
    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Skipped(SkipReason::NoSmtpConfig));

    // No market items configured for the evening digest.
    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Evening, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Skipped(SkipReason::NoMarketItems));
    assert_eq!(h.web.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_third_consecutive_failure_alerts_once() {
    let h = harness(
        &one_source_seed(),
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Fail,
    )
    .await;

    for run in 1..=3u32 {
        let outcome = h
            .orchestrator
            .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
            .await
            .unwrap();
        assert_eq!(outcome.status(), PushStatus::Failed);
        assert_eq!(h.orchestrator.streaks().get(h.industry_id, PushKind::Morning), run);
    }
    assert_eq!(h.mailer.alerts.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.seen_count().await.unwrap(), 0);

    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 3);
    assert!(audits.iter().all(|a| a.status == PushStatus::Failed));
    let err = audits[0].error.as_deref().unwrap();
    assert!(err.contains("connection refused"), "{err}");

    h.mailer.set_mode(MailMode::Send);
    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome.status(), PushStatus::Success);
    assert_eq!(h.orchestrator.streaks().get(h.industry_id, PushKind::Morning), 0);
    assert_eq!(h.mailer.alerts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_e_timed_out_source_does_not_fail_the_job() {
    let seed = format!(
        r#"{SMTP}
[[industries]]
name = "Semiconductors"

[[industries.sources]]
name = "Slow wire"
url = "https://slow.example.com/list"

[[industries.sources]]
name = "Wire B"
url = "https://b.example.com/list"

[[industries.recipients]]
email = "reader@example.com"
"#
    );
    let h = harness(
        &seed,
        FakeWeb::new(&[
            ("https://slow.example.com/list", None),
            ("https://b.example.com/list", Some(LISTING_B)),
        ]),
        MailMode::Send,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome.status(), PushStatus::Success);
    assert_eq!(
        *h.mailer.last_items.lock().unwrap(),
        vec!["https://b.example.com/story/lithography-tools".to_string()]
    );
    assert_eq!(h.store.seen_count().await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_industry_is_a_silent_no_op() {
    let h = harness(&one_source_seed(), FakeWeb::new(&[]), MailMode::Send).await;
    let outcome = h
        .orchestrator
        .run(h.industry_id + 100, PushKind::Morning, TriggerSource::Scheduler)
        .await;
    assert!(outcome.is_none());
    assert!(h
        .store
        .audits_for_industry(h.industry_id + 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn industry_rule_filters_before_top_n() {
    let seed = format!(
        r#"{SMTP}
[[industries]]
name = "Memory"
top_n = 5
keywords = "+memory"

[[industries.sources]]
name = "Wire A"
url = "https://a.example.com/list"

[[industries.recipients]]
email = "reader@example.com"
"#
    );
    let h = harness(
        &seed,
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Send,
    )
    .await;
    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome.status(), PushStatus::Success);
    assert_eq!(
        *h.mailer.last_items.lock().unwrap(),
        vec!["https://a.example.com/news/2024/memory-prices".to_string()]
    );
    // Only the delivered article is recorded.
    assert_eq!(h.store.seen_count().await.unwrap(), 1);
}

#[tokio::test]
async fn evening_digest_sends_quotes_and_skips_when_all_fail() {
    let seed = format!(
        r#"{SMTP}
[[industries]]
name = "Liquor"

[[industries.recipients]]
email = "reader@example.com"

[[industries.market_items]]
name = "Moutai"
symbol = "600519"

[[industries.market_items]]
name = "Broken"
symbol = "bad-1"

[[industries]]
name = "Nothing works"

[[industries.recipients]]
email = "reader@example.com"

[[industries.market_items]]
name = "Broken"
symbol = "bad-2"
"#
    );
    let h = harness(&seed, FakeWeb::new(&[]), MailMode::Send).await;

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Evening, TriggerSource::Manual)
        .await
        .unwrap();
    match outcome {
        PushOutcome::Succeeded(stats) => assert_eq!(stats.article_count, 1),
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(h.store.seen_count().await.unwrap(), 0);

    let broken = h.store.industries().await.unwrap()[1].id;
    let outcome = h
        .orchestrator
        .run(broken, PushKind::Evening, TriggerSource::Manual)
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Skipped(SkipReason::NoQuotes));
}

#[tokio::test]
async fn failed_commit_after_send_is_one_failed_audit_and_no_seen_rows() {
    let h = harness(
        &one_source_seed(),
        FakeWeb::new(&[("https://a.example.com/list", Some(LISTING_A))]),
        MailMode::Send,
    )
    .await;
    sqlx::query(
        "CREATE TRIGGER refuse_seen BEFORE INSERT ON seen_article \
         BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let outcome = h
        .orchestrator
        .run(h.industry_id, PushKind::Morning, TriggerSource::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome.status(), PushStatus::Failed);
    assert_eq!(h.mailer.sent.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.seen_count().await.unwrap(), 0);
    assert_eq!(h.orchestrator.streaks().get(h.industry_id, PushKind::Morning), 1);

    // The success row rolled back with the seen rows; only the failure remains.
    let audits = h.store.audits_for_industry(h.industry_id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, PushStatus::Failed);
    let err = audits[0].error.as_deref().unwrap();
    assert!(err.contains("committing delivery state"), "{err}");
    assert!(audits[0].html_snapshot.is_none());
}
