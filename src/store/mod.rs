//! SQLite persistence: configuration reads, delivered-article history, push audit
//! trail and source health fields.

mod audit;
mod health;
mod retention;
mod seed;
mod seen;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::model::{
    HealthStatus, Industry, MarketItem, MarketKind, PushKind, Recipient, ScheduleEntry,
    SmtpConfig, Source,
};

pub use retention::RetentionCounts;
pub use seed::SeedReport;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS industry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    top_n INTEGER NOT NULL DEFAULT 10,
    keywords TEXT
);

CREATE TABLE IF NOT EXISTS news_source (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    industry_id INTEGER NOT NULL REFERENCES industry(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    link_selector TEXT,
    weight INTEGER NOT NULL DEFAULT 5,
    keywords TEXT,
    language TEXT NOT NULL DEFAULT 'zh',
    health_status TEXT NOT NULL DEFAULT 'unknown',
    last_check_at TEXT,
    last_error TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_news_source_industry ON news_source(industry_id);

CREATE TABLE IF NOT EXISTS finance_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    industry_id INTEGER NOT NULL REFERENCES industry(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    item_type TEXT NOT NULL DEFAULT 'stock'
);

CREATE TABLE IF NOT EXISTS recipient (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    industry_id INTEGER NOT NULL REFERENCES industry(id) ON DELETE CASCADE,
    email TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS smtp_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    port INTEGER NOT NULL DEFAULT 465,
    username TEXT NOT NULL,
    password_encrypted TEXT NOT NULL,
    sender_name TEXT,
    contact_email TEXT,
    use_tls INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS push_schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    industry_id INTEGER NOT NULL REFERENCES industry(id) ON DELETE CASCADE,
    push_type TEXT NOT NULL,
    hour INTEGER NOT NULL,
    minute INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS seen_article (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    source_id INTEGER REFERENCES news_source(id) ON DELETE SET NULL,
    first_seen_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_seen_article_first_seen ON seen_article(first_seen_at);

CREATE TABLE IF NOT EXISTS push_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    industry_id INTEGER REFERENCES industry(id) ON DELETE SET NULL,
    push_type TEXT NOT NULL,
    status TEXT NOT NULL,
    article_count INTEGER NOT NULL DEFAULT 0,
    recipient_count INTEGER NOT NULL DEFAULT 0,
    error_msg TEXT,
    html_snapshot TEXT,
    triggered_by TEXT NOT NULL DEFAULT 'scheduler',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_push_log_created ON push_log(created_at);
"#;

/// Handle to the database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        ensure_parent_dir(database_url)?;
        let opts = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parsing database url {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .context("opening sqlite database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database (tests). A single connection that never
    /// expires, so the data lives as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .context("opening in-memory sqlite")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("applying schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn industry(&self, id: i64) -> Result<Option<Industry>> {
        let row = sqlx::query_as::<_, IndustryRow>(
            "SELECT id, name, top_n, keywords FROM industry WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn industries(&self) -> Result<Vec<Industry>> {
        let rows = sqlx::query_as::<_, IndustryRow>(
            "SELECT id, name, top_n, keywords FROM industry ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn sources_for_industry(&self, industry_id: i64) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "{SOURCE_COLUMNS} WHERE industry_id = ? ORDER BY id"
        ))
        .bind(industry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn all_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Sources with the given ids; unknown ids are ignored.
    pub async fn sources_by_ids(&self, ids: &[i64]) -> Result<Vec<Source>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(SOURCE_COLUMNS);
        qb.push(" WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(") ORDER BY id");
        let rows = qb
            .build_query_as::<SourceRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn source(&self, id: i64) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn recipients(&self, industry_id: i64) -> Result<Vec<Recipient>> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            "SELECT id, industry_id, email, name FROM recipient WHERE industry_id = ? ORDER BY id",
        )
        .bind(industry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Recipient {
                id: r.id,
                industry_id: r.industry_id,
                email: r.email,
                name: r.name,
            })
            .collect())
    }

    pub async fn market_items(&self, industry_id: i64) -> Result<Vec<MarketItem>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            "SELECT id, industry_id, name, symbol, item_type FROM finance_item \
             WHERE industry_id = ? ORDER BY id",
        )
        .bind(industry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| MarketItem {
                id: r.id,
                industry_id: r.industry_id,
                name: r.name,
                symbol: r.symbol,
                kind: MarketKind::parse(&r.item_type),
            })
            .collect())
    }

    /// The single mail account used for digests and alerts.
    pub async fn smtp_config(&self) -> Result<Option<SmtpConfig>> {
        let row = sqlx::query_as::<_, SmtpRow>(
            "SELECT id, host, port, username, password_encrypted, sender_name, contact_email, use_tls \
             FROM smtp_config ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SmtpConfig {
            id: r.id,
            host: r.host,
            port: u16::try_from(r.port).unwrap_or(465),
            username: r.username,
            password_encrypted: r.password_encrypted,
            sender_name: r.sender_name,
            contact_email: r.contact_email,
            use_tls: r.use_tls,
        }))
    }

    /// Every schedule row; rows with an unknown push type are skipped with a warning.
    pub async fn schedules(&self) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT id, industry_id, push_type, hour, minute, enabled FROM push_schedule ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let kind = match r.push_type.parse::<PushKind>() {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(schedule_id = r.id, error = %e, "skipping schedule row");
                    continue;
                }
            };
            out.push(ScheduleEntry {
                id: r.id,
                industry_id: r.industry_id,
                kind,
                hour: u32::try_from(r.hour).unwrap_or(0),
                minute: u32::try_from(r.minute).unwrap_or(0),
                enabled: r.enabled,
            });
        }
        Ok(out)
    }
}

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

const SOURCE_COLUMNS: &str = "SELECT id, industry_id, name, url, link_selector, weight, keywords, \
     language, health_status, last_check_at, last_error, consecutive_failures FROM news_source";

#[derive(Debug, FromRow)]
struct IndustryRow {
    id: i64,
    name: String,
    top_n: i64,
    keywords: Option<String>,
}

impl From<IndustryRow> for Industry {
    fn from(r: IndustryRow) -> Self {
        Industry {
            id: r.id,
            name: r.name,
            top_n: usize::try_from(r.top_n).unwrap_or(0),
            keywords: r.keywords,
        }
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: i64,
    industry_id: i64,
    name: String,
    url: String,
    link_selector: Option<String>,
    weight: i64,
    keywords: Option<String>,
    language: String,
    health_status: String,
    last_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: i64,
}

impl From<SourceRow> for Source {
    fn from(r: SourceRow) -> Self {
        Source {
            id: r.id,
            industry_id: r.industry_id,
            name: r.name,
            url: r.url,
            link_selector: r.link_selector,
            weight: r.weight,
            keywords: r.keywords,
            language: r.language,
            health_status: HealthStatus::parse(&r.health_status),
            last_check_at: r.last_check_at,
            last_error: r.last_error,
            consecutive_failures: u32::try_from(r.consecutive_failures).unwrap_or(0),
        }
    }
}

#[derive(Debug, FromRow)]
struct RecipientRow {
    id: i64,
    industry_id: i64,
    email: String,
    name: String,
}

#[derive(Debug, FromRow)]
struct MarketRow {
    id: i64,
    industry_id: i64,
    name: String,
    symbol: String,
    item_type: String,
}

#[derive(FromRow)]
struct SmtpRow {
    id: i64,
    host: String,
    port: i64,
    username: String,
    password_encrypted: String,
    sender_name: Option<String>,
    contact_email: Option<String>,
    use_tls: bool,
}

#[derive(Debug, FromRow)]
struct ScheduleRow {
    id: i64,
    industry_id: i64,
    push_type: String,
    hour: i64,
    minute: i64,
    enabled: bool,
}
