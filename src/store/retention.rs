use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionCounts {
    pub seen_deleted: u64,
    pub snapshots_cleared: u64,
    pub audits_deleted: u64,
}

impl Store {
    /// Prune in one transaction. Snapshots are cleared before old rows are
    /// deleted so rows in the middle window keep their metadata.
    pub async fn prune(
        &self,
        seen_before: DateTime<Utc>,
        snapshot_before: DateTime<Utc>,
        audit_before: DateTime<Utc>,
    ) -> Result<RetentionCounts> {
        let mut tx = self.pool.begin().await?;

        let seen_deleted = sqlx::query("DELETE FROM seen_article WHERE first_seen_at < ?")
            .bind(seen_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let snapshots_cleared = sqlx::query(
            "UPDATE push_log SET html_snapshot = NULL \
             WHERE created_at < ? AND html_snapshot IS NOT NULL",
        )
        .bind(snapshot_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let audits_deleted = sqlx::query("DELETE FROM push_log WHERE created_at < ?")
            .bind(audit_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(RetentionCounts {
            seen_deleted,
            snapshots_cleared,
            audits_deleted,
        })
    }

    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}
