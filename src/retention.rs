// src/retention.rs
//! Daily pruning of delivery history and audit data.
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::store::{RetentionCounts, Store};

pub const SEEN_RETENTION_DAYS: i64 = 7;
pub const SNAPSHOT_RETENTION_DAYS: i64 = 3;
pub const AUDIT_RETENTION_DAYS: i64 = 30;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("retention_deleted_total", "Rows pruned or snapshots cleared, by table.");
    });
}

/// Prune relative to `now`, then compact the database. A failing VACUUM is
/// logged and does not fail the sweep.
pub async fn sweep(store: &Store, now: DateTime<Utc>) -> Result<RetentionCounts> {
    ensure_metrics_described();
    let counts = store
        .prune(
            now - Duration::days(SEEN_RETENTION_DAYS),
            now - Duration::days(SNAPSHOT_RETENTION_DAYS),
            now - Duration::days(AUDIT_RETENTION_DAYS),
        )
        .await?;

    counter!("retention_deleted_total", "table" => "seen_article").increment(counts.seen_deleted);
    counter!("retention_deleted_total", "table" => "push_log_snapshot")
        .increment(counts.snapshots_cleared);
    counter!("retention_deleted_total", "table" => "push_log").increment(counts.audits_deleted);
    tracing::info!(
        seen_deleted = counts.seen_deleted,
        snapshots_cleared = counts.snapshots_cleared,
        audits_deleted = counts.audits_deleted,
        "retention sweep done"
    );

    if let Err(e) = store.vacuum().await {
        tracing::warn!(error = %e, "vacuum failed");
    }
    Ok(counts)
}
