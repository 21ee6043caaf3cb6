// src/model.rs
//! Domain types shared by the crawl, ranking, push and health paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which digest a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    /// News digest.
    Morning,
    /// Market-quote digest.
    Evening,
}

impl PushKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PushKind::Morning => "morning",
            PushKind::Evening => "evening",
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(PushKind::Morning),
            "evening" => Ok(PushKind::Evening),
            other => anyhow::bail!("unknown push kind: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Success,
    Skipped,
    Failed,
}

impl PushStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PushStatus::Success => "success",
            PushStatus::Skipped => "skipped",
            PushStatus::Failed => "failed",
        }
    }
}

impl FromStr for PushStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(PushStatus::Success),
            "skipped" => Ok(PushStatus::Skipped),
            "failed" => Ok(PushStatus::Failed),
            other => anyhow::bail!("unknown push status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduler,
    Manual,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Scheduler => "scheduler",
            TriggerSource::Manual => "manual",
        }
    }
}

/// Source health as written by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }

    /// Unrecognized stored values read back as `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => HealthStatus::Healthy,
            "warning" => HealthStatus::Warning,
            "error" => HealthStatus::Error,
            _ => HealthStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Industry {
    pub id: i64,
    pub name: String,
    pub top_n: usize,
    /// Industry-level keyword rule (OR semantics for `+` terms).
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub industry_id: i64,
    pub name: String,
    pub url: String,
    /// CSS selector for listing links; `None` means every anchor.
    pub link_selector: Option<String>,
    /// Trust/importance in [1, 10].
    pub weight: i64,
    pub keywords: Option<String>,
    pub language: String,
    pub health_status: HealthStatus,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Source {
    pub fn selector(&self) -> &str {
        match self.link_selector.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => "a",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub industry_id: i64,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Stock,
    StockHk,
    Futures,
}

impl MarketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketKind::Stock => "stock",
            MarketKind::StockHk => "stock_hk",
            MarketKind::Futures => "futures",
        }
    }

    /// Unrecognized values fall back to mainland stocks.
    pub fn parse(s: &str) -> Self {
        match s {
            "stock_hk" => MarketKind::StockHk,
            "futures" => MarketKind::Futures,
            _ => MarketKind::Stock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketItem {
    pub id: i64,
    pub industry_id: i64,
    pub name: String,
    pub symbol: String,
    pub kind: MarketKind,
}

/// Mail transport settings. The password stays encrypted until the mailer needs it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password_encrypted: String,
    pub sender_name: Option<String>,
    pub contact_email: Option<String>,
    /// Implicit TLS when true, STARTTLS otherwise.
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn contact(&self) -> &str {
        match self.contact_email.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => &self.username,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub industry_id: i64,
    pub kind: PushKind,
    pub hour: u32,
    pub minute: u32,
    pub enabled: bool,
}

impl ScheduleEntry {
    pub fn job_name(&self) -> String {
        format!("{}_{}", self.kind, self.industry_id)
    }

    /// Six-field cron expression (sec min hour dom mon dow).
    pub fn cron(&self) -> String {
        format!("0 {} {} * * *", self.minute, self.hour)
    }
}

/// One crawled article, alive only within a single job execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source_id: i64,
    pub source_name: String,
    pub source_weight: i64,
    pub source_keywords: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub name: String,
    pub symbol: String,
    pub price: f64,
    /// Percent, e.g. `1.25` for +1.25 %.
    pub change_pct: f64,
    pub kind: MarketKind,
    pub fetched_at: DateTime<Utc>,
}

/// One audit row as written; `id`/`created_at` are assigned on insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub industry_id: Option<i64>,
    pub kind: PushKind,
    pub status: PushStatus,
    pub article_count: usize,
    pub recipient_count: usize,
    pub error: Option<String>,
    pub html_snapshot: Option<String>,
    pub triggered_by: TriggerSource,
}

/// Stored audit row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushAudit {
    pub id: i64,
    pub industry_id: Option<i64>,
    pub kind: PushKind,
    pub status: PushStatus,
    pub article_count: i64,
    pub recipient_count: i64,
    pub error: Option<String>,
    pub html_snapshot: Option<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_kind_parses_case_insensitively() {
        assert_eq!("Morning".parse::<PushKind>().unwrap(), PushKind::Morning);
        assert_eq!(" evening ".parse::<PushKind>().unwrap(), PushKind::Evening);
        assert!("noon".parse::<PushKind>().is_err());
    }

    #[test]
    fn schedule_entry_cron_and_job_name() {
        let e = ScheduleEntry {
            id: 1,
            industry_id: 7,
            kind: PushKind::Evening,
            hour: 18,
            minute: 5,
            enabled: true,
        };
        assert_eq!(e.cron(), "0 5 18 * * *");
        assert_eq!(e.job_name(), "evening_7");
    }

    #[test]
    fn empty_selector_means_all_anchors() {
        let mut s = Source {
            id: 1,
            industry_id: 1,
            name: "x".into(),
            url: "https://example.com".into(),
            link_selector: Some("   ".into()),
            weight: 5,
            keywords: None,
            language: "zh".into(),
            health_status: HealthStatus::Unknown,
            last_check_at: None,
            last_error: None,
            consecutive_failures: 0,
        };
        assert_eq!(s.selector(), "a");
        s.link_selector = Some(".list li".into());
        assert_eq!(s.selector(), ".list li");
    }

    #[test]
    fn smtp_debug_hides_secret() {
        let cfg = SmtpConfig {
            id: 1,
            host: "smtp.example.com".into(),
            port: 465,
            username: "bot@example.com".into(),
            password_encrypted: "gAAAAAsecret".into(),
            sender_name: None,
            contact_email: None,
            use_tls: true,
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("gAAAAAsecret"));
        assert_eq!(cfg.contact(), "bot@example.com");
    }
}
