use anyhow::Result;
use chrono::{DateTime, Utc};

use super::Store;
use crate::model::HealthStatus;

impl Store {
    /// Write one probe result. An `Error` bumps the failure streak, anything else
    /// clears it. Returns the streak after the update (`None` for an unknown source).
    pub async fn record_health(
        &self,
        source_id: i64,
        status: HealthStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let failures: Option<i64> = sqlx::query_scalar(
            "UPDATE news_source SET \
                 health_status = ?, \
                 last_check_at = ?, \
                 last_error = ?, \
                 consecutive_failures = CASE WHEN ? THEN consecutive_failures + 1 ELSE 0 END \
             WHERE id = ? RETURNING consecutive_failures",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(error)
        .bind(status == HealthStatus::Error)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(failures.map(|n| u32::try_from(n).unwrap_or(u32::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::basic_fixture;

    #[tokio::test]
    async fn error_increments_and_success_resets() {
        let store = Store::in_memory().await.unwrap();
        let (_, source_id) = basic_fixture(&store).await;
        let now = Utc::now();

        for expected in 1..=3 {
            let n = store
                .record_health(source_id, HealthStatus::Error, Some("timeout"), now)
                .await
                .unwrap();
            assert_eq!(n, Some(expected));
        }
        let n = store
            .record_health(source_id, HealthStatus::Warning, Some("empty"), now)
            .await
            .unwrap();
        assert_eq!(n, Some(0));

        let src = store.source(source_id).await.unwrap().unwrap();
        assert_eq!(src.health_status, HealthStatus::Warning);
        assert_eq!(src.last_error.as_deref(), Some("empty"));
        assert!(src.last_check_at.is_some());

        assert_eq!(
            store
                .record_health(9999, HealthStatus::Healthy, None, now)
                .await
                .unwrap(),
            None
        );
    }
}
