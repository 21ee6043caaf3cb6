//! # Push Orchestrator
//! One job execution per (industry, kind): load configuration, crawl, dedup,
//! rank, send, then commit delivery state and the audit row together.
//!
//! Every execution ends in a [`PushOutcome`] and exactly one audit row, except
//! when the industry no longer exists (a stale schedule entry), which is a
//! silent no-op. Delivery history is only written after the mailer confirms a
//! non-empty send; a crash between send and commit can therefore re-deliver.

pub mod streak;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};

use crate::analyze::{score_and_rank, Deduplicator, KeywordRule};
use crate::ingest::CrawlEngine;
use crate::market::{fetch_quotes, QuoteFetcher};
use crate::model::{AuditEntry, Candidate, Industry, PushKind, PushStatus, TriggerSource};
use crate::notify::{render, Mailer};
use crate::security::{redact, truncate_chars};
use crate::store::Store;

pub use streak::{FailureStreaks, ALERT_THRESHOLD};

/// Upper bound for error text stored in an audit row.
pub const AUDIT_ERROR_MAX_CHARS: usize = 500;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("push_runs_total", "Digest job executions by kind and status.");
        describe_counter!(
            "push_alerts_total",
            "Alert e-mails attempted after repeated push failures."
        );
    });
}

/// Why a run ended without sending anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSources,
    NoMarketItems,
    NoRecipients,
    NoSmtpConfig,
    /// Ranking kept nothing (everything seen, filtered or no articles).
    NothingNew,
    /// Mailer rendered nothing to send.
    NothingSent,
    NoQuotes,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoSources => "config missing: no sources configured",
            SkipReason::NoMarketItems => "config missing: no market items configured",
            SkipReason::NoRecipients => "config missing: no recipients configured",
            SkipReason::NoSmtpConfig => "config missing: no smtp credentials configured",
            SkipReason::NothingNew => "nothing new to send",
            SkipReason::NothingSent => "nothing sent: mailer rendered an empty digest",
            SkipReason::NoQuotes => "no market quotes",
        };
        f.write_str(s)
    }
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushStats {
    /// Articles (morning) or quotes (evening) delivered.
    pub article_count: usize,
    pub recipient_count: usize,
    #[serde(skip)]
    pub html: String,
}

/// Result of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail")]
pub enum PushOutcome {
    #[serde(rename = "success")]
    Succeeded(PushStats),
    #[serde(rename = "skipped")]
    Skipped(SkipReason),
    #[serde(rename = "failed")]
    Failed(String),
}

impl PushOutcome {
    pub fn status(&self) -> PushStatus {
        match self {
            PushOutcome::Succeeded(_) => PushStatus::Success,
            PushOutcome::Skipped(_) => PushStatus::Skipped,
            PushOutcome::Failed(_) => PushStatus::Failed,
        }
    }

    fn failed(err: &anyhow::Error) -> Self {
        PushOutcome::Failed(truncate_chars(&redact(&format!("{err:#}")), AUDIT_ERROR_MAX_CHARS))
    }
}

/// The one place an outcome becomes an audit row.
pub fn audit_entry(
    industry_id: i64,
    kind: PushKind,
    trigger: TriggerSource,
    outcome: &PushOutcome,
) -> AuditEntry {
    let (article_count, recipient_count, error, html_snapshot) = match outcome {
        PushOutcome::Succeeded(s) => (s.article_count, s.recipient_count, None, Some(s.html.clone())),
        PushOutcome::Skipped(r) => (0, 0, Some(r.to_string()), None),
        PushOutcome::Failed(e) => (0, 0, Some(e.clone()), None),
    };
    AuditEntry {
        industry_id: Some(industry_id),
        kind,
        status: outcome.status(),
        article_count,
        recipient_count,
        error,
        html_snapshot,
        triggered_by: trigger,
    }
}

/// What the pipeline produced before anything is committed.
enum Step {
    Skip(SkipReason),
    Delivered {
        /// Articles to record as seen; empty for evening digests.
        delivered: Vec<Candidate>,
        stats: PushStats,
    },
}

pub struct PushOrchestrator {
    store: Store,
    crawler: CrawlEngine,
    dedup: Deduplicator,
    mailer: Arc<dyn Mailer>,
    quotes: Arc<dyn QuoteFetcher>,
    streaks: Arc<FailureStreaks>,
}

impl PushOrchestrator {
    pub fn new(
        store: Store,
        crawler: CrawlEngine,
        dedup: Deduplicator,
        mailer: Arc<dyn Mailer>,
        quotes: Arc<dyn QuoteFetcher>,
        streaks: Arc<FailureStreaks>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            crawler,
            dedup,
            mailer,
            quotes,
            streaks,
        }
    }

    pub fn streaks(&self) -> &FailureStreaks {
        &self.streaks
    }

    /// Run one digest job. `None` only when the industry does not exist.
    pub async fn run(
        &self,
        industry_id: i64,
        kind: PushKind,
        trigger: TriggerSource,
    ) -> Option<PushOutcome> {
        let now = Utc::now();
        let industry = match self.store.industry(industry_id).await {
            Ok(Some(i)) => i,
            Ok(None) => {
                tracing::info!(industry_id, kind = kind.as_str(), "industry not found, skipping stale job");
                return None;
            }
            Err(e) => {
                let err = e.context("loading industry");
                return Some(self.fail(industry_id, None, kind, trigger, &err, now).await);
            }
        };
        tracing::info!(industry_id, industry = %industry.name, kind = kind.as_str(), trigger = trigger.as_str(), "push started");

        let step = match kind {
            PushKind::Morning => self.morning(&industry, now).await,
            PushKind::Evening => self.evening(&industry).await,
        };

        let outcome = match step {
            Ok(Step::Skip(reason)) => {
                let outcome = PushOutcome::Skipped(reason);
                self.write_audit_isolated(&audit_entry(industry_id, kind, trigger, &outcome), now)
                    .await;
                tracing::info!(industry_id, kind = kind.as_str(), %reason, "push skipped");
                outcome
            }
            Ok(Step::Delivered { delivered, stats }) => {
                let outcome = PushOutcome::Succeeded(stats);
                let entry = audit_entry(industry_id, kind, trigger, &outcome);
                match self.commit_success(&delivered, &entry, now).await {
                    Ok(new_seen) => {
                        self.streaks.reset(industry_id, kind);
                        tracing::info!(industry_id, kind = kind.as_str(), articles = entry.article_count, new_seen, "push succeeded");
                        outcome
                    }
                    Err(e) => {
                        let err = e.context("committing delivery state");
                        self.fail(industry_id, Some(&industry), kind, trigger, &err, now).await
                    }
                }
            }
            Err(e) => self.fail(industry_id, Some(&industry), kind, trigger, &e, now).await,
        };

        counter!("push_runs_total", "kind" => kind.as_str(), "status" => outcome.status().as_str())
            .increment(1);
        Some(outcome)
    }

    async fn morning(&self, industry: &Industry, now: DateTime<Utc>) -> Result<Step> {
        let sources = self
            .store
            .sources_for_industry(industry.id)
            .await
            .context("loading sources")?;
        if sources.is_empty() {
            return Ok(Step::Skip(SkipReason::NoSources));
        }
        let Some((recipients, smtp)) = self.delivery_config(industry.id).await? else {
            return Ok(Step::Skip(self.missing_delivery_reason(industry.id).await?));
        };

        let fresh = self.crawler.crawl(&sources, now).await;
        let unique = self.dedup.dedup(fresh).await;
        let rule = KeywordRule::parse_opt(industry.keywords.as_deref());
        let ranked = score_and_rank(unique, industry.top_n, rule.as_ref(), now);
        if ranked.is_empty() {
            return Ok(Step::Skip(SkipReason::NothingNew));
        }
        let items: Vec<Candidate> = ranked.into_iter().map(|s| s.candidate).collect();

        let html = self
            .mailer
            .send_morning(&smtp, &recipients, &industry.name, &items)
            .await
            .context("sending morning digest")?;
        if html.is_empty() {
            return Ok(Step::Skip(SkipReason::NothingSent));
        }
        Ok(Step::Delivered {
            stats: PushStats {
                article_count: items.len(),
                recipient_count: recipients.len(),
                html,
            },
            delivered: items,
        })
    }

    async fn evening(&self, industry: &Industry) -> Result<Step> {
        let items = self
            .store
            .market_items(industry.id)
            .await
            .context("loading market items")?;
        if items.is_empty() {
            return Ok(Step::Skip(SkipReason::NoMarketItems));
        }
        let Some((recipients, smtp)) = self.delivery_config(industry.id).await? else {
            return Ok(Step::Skip(self.missing_delivery_reason(industry.id).await?));
        };

        let quotes = fetch_quotes(&self.quotes, &items).await;
        if quotes.is_empty() {
            return Ok(Step::Skip(SkipReason::NoQuotes));
        }
        let html = self
            .mailer
            .send_evening(&smtp, &recipients, &industry.name, &quotes)
            .await
            .context("sending evening digest")?;
        if html.is_empty() {
            return Ok(Step::Skip(SkipReason::NothingSent));
        }
        Ok(Step::Delivered {
            delivered: Vec::new(),
            stats: PushStats {
                article_count: quotes.len(),
                recipient_count: recipients.len(),
                html,
            },
        })
    }

    /// Recipient addresses and SMTP account, or `None` when either is missing.
    async fn delivery_config(
        &self,
        industry_id: i64,
    ) -> Result<Option<(Vec<String>, crate::model::SmtpConfig)>> {
        let recipients: Vec<String> = self
            .store
            .recipients(industry_id)
            .await
            .context("loading recipients")?
            .into_iter()
            .map(|r| r.email)
            .collect();
        if recipients.is_empty() {
            return Ok(None);
        }
        let smtp = self.store.smtp_config().await.context("loading smtp config")?;
        Ok(smtp.map(|s| (recipients, s)))
    }

    async fn missing_delivery_reason(&self, industry_id: i64) -> Result<SkipReason> {
        if self.store.recipients(industry_id).await?.is_empty() {
            Ok(SkipReason::NoRecipients)
        } else {
            Ok(SkipReason::NoSmtpConfig)
        }
    }

    /// Seen rows for the delivered subset and the success audit, in one transaction.
    async fn commit_success(
        &self,
        delivered: &[Candidate],
        entry: &AuditEntry,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.store.pool().begin().await?;
        let new_seen = Store::insert_seen(&mut *tx, delivered, now).await?;
        Store::insert_audit(&mut *tx, entry, now).await?;
        tx.commit().await?;
        Ok(new_seen)
    }

    async fn fail(
        &self,
        industry_id: i64,
        industry: Option<&Industry>,
        kind: PushKind,
        trigger: TriggerSource,
        err: &anyhow::Error,
        now: DateTime<Utc>,
    ) -> PushOutcome {
        let outcome = PushOutcome::failed(err);
        tracing::error!(industry_id, kind = kind.as_str(), error = %redact(&format!("{err:#}")), "push failed");
        self.write_audit_isolated(&audit_entry(industry_id, kind, trigger, &outcome), now)
            .await;

        let streak = self.streaks.record_failure(industry_id, kind);
        if streak::crosses_threshold(streak) {
            let name = industry
                .map(|i| i.name.clone())
                .unwrap_or_else(|| format!("#{industry_id}"));
            let detail = match &outcome {
                PushOutcome::Failed(e) => e.clone(),
                _ => String::new(),
            };
            self.alert(&name, kind, streak, &detail).await;
        }
        outcome
    }

    /// Audit write on its own pool connection, retried once. Never propagates.
    async fn write_audit_isolated(&self, entry: &AuditEntry, now: DateTime<Utc>) {
        for attempt in 1..=2 {
            let res: Result<i64> = async {
                let mut conn = self.store.pool().acquire().await?;
                Store::insert_audit(&mut *conn, entry, now).await
            }
            .await;
            match res {
                Ok(_) => return,
                Err(e) => tracing::error!(
                    attempt,
                    status = entry.status.as_str(),
                    error = %redact(&e.to_string()),
                    "audit write failed"
                ),
            }
        }
    }

    /// Best effort: alert failures are logged only.
    async fn alert(&self, industry: &str, kind: PushKind, streak: u32, detail: &str) {
        counter!("push_alerts_total").increment(1);
        let smtp = match self.store.smtp_config().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::warn!(industry, kind = kind.as_str(), "no smtp config, cannot send failure alert");
                return;
            }
            Err(e) => {
                tracing::warn!(industry, error = %e, "cannot load smtp config for alert");
                return;
            }
        };
        let subject = format!("【告警】{industry} {kind} 推送连续失败 {streak} 次");
        let html = render::alert_html(
            &subject,
            &[
                format!("行业: {industry}"),
                format!("类型: {kind}"),
                format!("连续失败: {streak}"),
                format!("最近错误: {detail}"),
            ],
        );
        match self.mailer.send_alert(&smtp, &subject, &html).await {
            Ok(()) => tracing::warn!(industry, kind = kind.as_str(), streak, "failure alert sent"),
            Err(e) => tracing::error!(industry, kind = kind.as_str(), error = %e, "failure alert could not be sent"),
        }
    }
}
