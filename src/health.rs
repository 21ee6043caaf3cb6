// src/health.rs
//! Source health probes: fetch each listing page and count the links its
//! selector yields. Runs as a periodic sweep or on a chosen subset.
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::ingest::fetch::PageFetcher;
use crate::ingest::listing_link_count;
use crate::model::{HealthStatus, Source};
use crate::notify::{render, Mailer};
use crate::push::ALERT_THRESHOLD;
use crate::security::{redact, truncate_chars};
use crate::store::Store;

pub const HEALTH_ERROR_MAX_CHARS: usize = 200;
pub const SELECTOR_MISS: &str = "page reachable, selector matched nothing";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("health_checks_total", "Source probes by resulting status.");
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub source_id: i64,
    pub source_name: String,
    pub status: HealthStatus,
    pub links: usize,
    pub error: Option<String>,
    pub consecutive_failures: u32,
}

pub struct HealthMonitor {
    store: Store,
    fetcher: Arc<dyn PageFetcher>,
    mailer: Arc<dyn Mailer>,
    permits: Arc<Semaphore>,
}

impl HealthMonitor {
    pub fn new(
        store: Store,
        fetcher: Arc<dyn PageFetcher>,
        mailer: Arc<dyn Mailer>,
        concurrency: usize,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            fetcher,
            mailer,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Probe every configured source.
    pub async fn check_all(&self) -> Result<Vec<HealthReport>> {
        let sources = self.store.all_sources().await.context("loading sources")?;
        Ok(self.check(&sources).await)
    }

    /// Probe the given sources; unknown ids are ignored.
    pub async fn check_sources(&self, ids: &[i64]) -> Result<Vec<HealthReport>> {
        let sources = self
            .store
            .sources_by_ids(ids)
            .await
            .context("loading sources")?;
        Ok(self.check(&sources).await)
    }

    async fn check(&self, sources: &[Source]) -> Vec<HealthReport> {
        let reports = join_all(sources.iter().map(|s| self.check_one(s))).await;
        let failing = reports
            .iter()
            .filter(|r| r.status == HealthStatus::Error)
            .count();
        tracing::info!(checked = reports.len(), failing, "health check finished");
        reports
    }

    async fn check_one(&self, src: &Source) -> HealthReport {
        let (status, links, error) = {
            let _permit = self.permits.acquire().await.ok();
            match self.fetcher.fetch(&src.url).await {
                Ok(page) => match listing_link_count(&page, src.selector()) {
                    Ok(0) => (HealthStatus::Warning, 0, Some(SELECTOR_MISS.to_string())),
                    Ok(n) => (HealthStatus::Healthy, n, None),
                    Err(e) => (HealthStatus::Error, 0, Some(bounded(&e.to_string()))),
                },
                Err(e) => (HealthStatus::Error, 0, Some(bounded(&e.to_string()))),
            }
        };
        counter!("health_checks_total", "status" => status.as_str()).increment(1);

        let failures = match self
            .store
            .record_health(src.id, status, error.as_deref(), Utc::now())
            .await
        {
            Ok(n) => n.unwrap_or(0),
            Err(e) => {
                tracing::error!(source = %src.name, error = %e, "cannot record health");
                0
            }
        };
        if status == HealthStatus::Error {
            tracing::warn!(source = %src.name, url = %src.url, failures, error = ?error, "source unhealthy");
            if failures == ALERT_THRESHOLD {
                self.alert(src, failures, error.as_deref().unwrap_or_default()).await;
            }
        }

        HealthReport {
            source_id: src.id,
            source_name: src.name.clone(),
            status,
            links,
            error,
            consecutive_failures: failures,
        }
    }

    async fn alert(&self, src: &Source, failures: u32, detail: &str) {
        let smtp = match self.store.smtp_config().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::warn!(source = %src.name, "no smtp config, cannot send health alert");
                return;
            }
            Err(e) => {
                tracing::warn!(source = %src.name, error = %e, "cannot load smtp config for alert");
                return;
            }
        };
        let subject = format!("【告警】新闻源 {} 连续 {failures} 次检查失败", src.name);
        let html = render::alert_html(
            &subject,
            &[
                format!("新闻源: {}", src.name),
                format!("地址: {}", src.url),
                format!("连续失败: {failures}"),
                format!("最近错误: {detail}"),
            ],
        );
        if let Err(e) = self.mailer.send_alert(&smtp, &subject, &html).await {
            tracing::error!(source = %src.name, error = %e, "health alert could not be sent");
        }
    }
}

fn bounded(text: &str) -> String {
    truncate_chars(&redact(text), HEALTH_ERROR_MAX_CHARS)
}
