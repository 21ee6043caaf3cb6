// src/scheduler.rs
//! Cron triggers: one job per enabled schedule entry, plus the periodic health
//! sweep and the daily retention sweep. Digest jobs can be reloaded from the
//! store without restarting the process.
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::health::HealthMonitor;
use crate::model::{ScheduleEntry, TriggerSource};
use crate::push::PushOrchestrator;
use crate::retention;
use crate::store::Store;

pub struct DigestScheduler {
    sched: JobScheduler,
    store: Store,
    orchestrator: Arc<PushOrchestrator>,
    offset: FixedOffset,
    /// Registered digest jobs by name (`{kind}_{industry_id}`).
    digest_jobs: Mutex<BTreeMap<String, Uuid>>,
}

impl DigestScheduler {
    /// Cron expressions are evaluated at a fixed UTC offset (hours).
    pub async fn new(
        store: Store,
        orchestrator: Arc<PushOrchestrator>,
        utc_offset_hours: i32,
    ) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .with_context(|| format!("invalid utc offset {utc_offset_hours}h"))?;
        let sched = JobScheduler::new().await.context("creating job scheduler")?;
        Ok(Self {
            sched,
            store,
            orchestrator,
            offset,
            digest_jobs: Mutex::new(BTreeMap::new()),
        })
    }

    /// Register the health and retention sweeps.
    pub async fn add_maintenance(
        &self,
        health: Arc<HealthMonitor>,
        health_cron: &str,
        retention_cron: &str,
    ) -> Result<()> {
        let health_job = Job::new_async_tz(health_cron, self.offset, move |_uuid, _lock| {
            let health = health.clone();
            Box::pin(async move {
                if let Err(e) = health.check_all().await {
                    tracing::error!(error = %e, "scheduled health check failed");
                }
            })
        })
        .with_context(|| format!("invalid health cron {health_cron:?}"))?;
        self.sched.add(health_job).await?;

        let store = self.store.clone();
        let retention_job = Job::new_async_tz(retention_cron, self.offset, move |_uuid, _lock| {
            let store = store.clone();
            Box::pin(async move {
                if let Err(e) = retention::sweep(&store, Utc::now()).await {
                    tracing::error!(error = %e, "scheduled retention sweep failed");
                }
            })
        })
        .with_context(|| format!("invalid retention cron {retention_cron:?}"))?;
        self.sched.add(retention_job).await?;

        tracing::info!(health_cron, retention_cron, "maintenance jobs registered");
        Ok(())
    }

    /// Drop every digest job and register one per enabled schedule entry.
    /// Returns the number of digest jobs now registered.
    pub async fn reload_schedules(&self) -> Result<usize> {
        let entries = self.store.schedules().await.context("loading schedules")?;
        let mut jobs = self.digest_jobs.lock().await;

        for (name, id) in std::mem::take(&mut *jobs) {
            if let Err(e) = self.sched.remove(&id).await {
                tracing::warn!(job = %name, error = %e, "cannot remove digest job");
            }
        }

        for entry in entries.iter().filter(|e| e.enabled) {
            let name = entry.job_name();
            let id = match self.add_digest_job(entry).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(job = %name, error = %e, "cannot register digest job");
                    continue;
                }
            };
            // Last entry for the same industry and kind wins.
            if let Some(old) = jobs.insert(name.clone(), id) {
                tracing::warn!(job = %name, "duplicate schedule entry replaces earlier one");
                if let Err(e) = self.sched.remove(&old).await {
                    tracing::warn!(job = %name, error = %e, "cannot remove replaced digest job");
                }
            }
            tracing::info!(job = %name, hour = entry.hour, minute = entry.minute, "digest job registered");
        }
        Ok(jobs.len())
    }

    async fn add_digest_job(&self, entry: &ScheduleEntry) -> Result<Uuid> {
        let cron = entry.cron();
        let orchestrator = self.orchestrator.clone();
        let (industry_id, kind) = (entry.industry_id, entry.kind);
        let job = Job::new_async_tz(cron.as_str(), self.offset, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                orchestrator
                    .run(industry_id, kind, TriggerSource::Scheduler)
                    .await;
            })
        })
        .with_context(|| format!("invalid cron {cron:?}"))?;
        Ok(self.sched.add(job).await?)
    }

    /// Names of the registered digest jobs.
    pub async fn digest_job_names(&self) -> Vec<String> {
        self.digest_jobs.lock().await.keys().cloned().collect()
    }

    pub async fn start(&self) -> Result<()> {
        self.sched.start().await.context("starting job scheduler")?;
        Ok(())
    }
}
