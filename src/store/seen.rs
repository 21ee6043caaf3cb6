use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::Store;
use crate::model::Candidate;

// SQLite's default bound-parameter limit is 999 on older builds.
const IN_CHUNK: usize = 500;

impl Store {
    /// Which of `urls` were already delivered.
    pub async fn seen_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();
        for chunk in urls.chunks(IN_CHUNK) {
            let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                "SELECT url FROM seen_article WHERE url IN (",
            );
            let mut sep = qb.separated(", ");
            for u in chunk {
                sep.push_bind(u.as_str());
            }
            sep.push_unseparated(")");
            let rows: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;
            seen.extend(rows);
        }
        Ok(seen)
    }

    /// Record delivered articles. Already-present URLs are left untouched.
    /// Returns the number of new rows.
    pub async fn insert_seen(
        conn: &mut SqliteConnection,
        items: &[Candidate],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inserted = 0;
        for item in items {
            let res = sqlx::query(
                "INSERT INTO seen_article (url, title, source_id, first_seen_at) \
                 VALUES (?, ?, ?, ?) ON CONFLICT(url) DO NOTHING",
            )
            .bind(&item.url)
            .bind(&item.title)
            .bind(item.source_id)
            .bind(at)
            .execute(&mut *conn)
            .await?;
            inserted += res.rows_affected();
        }
        Ok(inserted)
    }

    /// Forget delivery history for every source of an industry.
    pub async fn reset_seen_for_industry(&self, industry_id: i64) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM seen_article WHERE source_id IN \
             (SELECT id FROM news_source WHERE industry_id = ?)",
        )
        .bind(industry_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn seen_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_article")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
