use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use super::Store;
use crate::model::{AuditEntry, PushAudit, PushKind, PushStatus};

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    industry_id: Option<i64>,
    push_type: String,
    status: String,
    article_count: i64,
    recipient_count: i64,
    error_msg: Option<String>,
    html_snapshot: Option<String>,
    triggered_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for PushAudit {
    type Error = anyhow::Error;

    fn try_from(r: AuditRow) -> Result<Self> {
        Ok(PushAudit {
            id: r.id,
            industry_id: r.industry_id,
            kind: r.push_type.parse::<PushKind>()?,
            status: r.status.parse::<PushStatus>()?,
            article_count: r.article_count,
            recipient_count: r.recipient_count,
            error: r.error_msg,
            html_snapshot: r.html_snapshot,
            triggered_by: r.triggered_by,
            created_at: r.created_at,
        })
    }
}

const AUDIT_COLUMNS: &str = "SELECT id, industry_id, push_type, status, article_count, \
     recipient_count, error_msg, html_snapshot, triggered_by, created_at FROM push_log";

impl Store {
    /// Append one audit row on the given connection (pool connection or open
    /// transaction). Returns the row id.
    pub async fn insert_audit(
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO push_log (industry_id, push_type, status, article_count, recipient_count, \
             error_msg, html_snapshot, triggered_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.industry_id)
        .bind(entry.kind.as_str())
        .bind(entry.status.as_str())
        .bind(i64::try_from(entry.article_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(entry.recipient_count).unwrap_or(i64::MAX))
        .bind(entry.error.as_deref())
        .bind(entry.html_snapshot.as_deref())
        .bind(entry.triggered_by.as_str())
        .bind(at)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    pub async fn audit(&self, id: i64) -> Result<Option<PushAudit>> {
        let row = sqlx::query_as::<_, AuditRow>(&format!("{AUDIT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PushAudit::try_from).transpose()
    }

    /// Newest first.
    pub async fn audits_for_industry(&self, industry_id: i64) -> Result<Vec<PushAudit>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "{AUDIT_COLUMNS} WHERE industry_id = ? ORDER BY id DESC"
        ))
        .bind(industry_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PushAudit::try_from).collect()
    }
}
