// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod health;
pub mod ingest;
pub mod market;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod push;
pub mod retention;
pub mod scheduler;
pub mod security;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;

use crate::analyze::Deduplicator;
use crate::api::AppState;
use crate::config::{seed::load_seed_default, AppConfig};
use crate::health::HealthMonitor;
use crate::ingest::{CrawlEngine, HttpFetcher, RetryPolicy, SummaryChain};
use crate::market::{EastmoneyQuoteFetcher, QuoteFetcher};
use crate::notify::{Mailer, SmtpMailer};
use crate::push::{FailureStreaks, PushOrchestrator};
use crate::scheduler::DigestScheduler;
use crate::security::{CredentialCipher, UrlGuard};
use crate::store::Store;

pub use crate::api::router;

const CRAWL_TIMEOUT: Duration = Duration::from_secs(20);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything the binary needs: the HTTP router and the (not yet started)
/// cron scheduler with all jobs registered.
pub struct App {
    pub router: Router,
    pub scheduler: Arc<DigestScheduler>,
}

/// Open the store, apply the seed file, wire the services and register jobs.
pub async fn app(config: &AppConfig, metrics: Option<&crate::metrics::Metrics>) -> Result<App> {
    let store = Store::connect(&config.database_url).await?;
    let cipher = CredentialCipher::from_env_or_ephemeral(config.fernet_key.as_deref())
        .context("loading FERNET_KEY")?;

    if let Some(seed) = load_seed_default(config.seed_path.as_deref())? {
        let report = store.apply_seed(&seed, &cipher).await?;
        tracing::info!(
            created = report.industries_created,
            existing = report.industries_existing,
            smtp_written = report.smtp_written,
            "seed applied"
        );
    }

    let crawl_fetcher = Arc::new(HttpFetcher::new(UrlGuard::new(), CRAWL_TIMEOUT)?);
    let crawler = CrawlEngine::new(
        crawl_fetcher,
        Arc::new(SummaryChain::from_settings(&config.ai)),
        store.clone(),
        config.crawl_detail_concurrency,
    );
    let dedup = Deduplicator::from_settings(&config.ai, config.dedup_threshold);
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(cipher));
    let quotes: Arc<dyn QuoteFetcher> = Arc::new(EastmoneyQuoteFetcher::new()?);
    let orchestrator = Arc::new(PushOrchestrator::new(
        store.clone(),
        crawler,
        dedup,
        mailer.clone(),
        quotes,
        Arc::new(FailureStreaks::new()),
    ));

    let health_fetcher = HttpFetcher::new(UrlGuard::new(), HEALTH_TIMEOUT)?
        .with_retry(RetryPolicy::single_attempt());
    let health = Arc::new(HealthMonitor::new(
        store.clone(),
        Arc::new(health_fetcher),
        mailer,
        config.health_concurrency,
    ));

    let scheduler = Arc::new(
        DigestScheduler::new(store.clone(), orchestrator.clone(), config.schedule_utc_offset_hours)
            .await?,
    );
    scheduler
        .add_maintenance(health.clone(), &config.health_check_cron, &config.retention_cron)
        .await?;
    let jobs = scheduler.reload_schedules().await?;
    tracing::info!(jobs, ai = config.ai.enabled(), "services ready");

    let state = AppState {
        store,
        orchestrator,
        health,
        scheduler: Some(scheduler.clone()),
    };
    Ok(App {
        router: router(state, metrics),
        scheduler,
    })
}
