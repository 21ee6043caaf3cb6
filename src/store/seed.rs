use anyhow::{Context, Result};
use serde::Serialize;

use super::Store;
use crate::config::seed::{SeedFile, SeedIndustry};
use crate::security::CredentialCipher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub industries_created: usize,
    pub industries_existing: usize,
    pub smtp_written: bool,
}

impl Store {
    /// Insert whatever the seed describes that is not already present.
    /// Industries match by name; the SMTP block is only written into an empty table.
    pub async fn apply_seed(&self, seed: &SeedFile, cipher: &CredentialCipher) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        let mut tx = self.pool.begin().await?;

        if let Some(smtp) = &seed.smtp {
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM smtp_config")
                .fetch_one(&mut *tx)
                .await?;
            if existing == 0 {
                sqlx::query(
                    "INSERT INTO smtp_config (host, port, username, password_encrypted, \
                     sender_name, contact_email, use_tls) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&smtp.host)
                .bind(i64::from(smtp.port))
                .bind(&smtp.username)
                .bind(cipher.encrypt(&smtp.password))
                .bind(smtp.sender_name.as_deref())
                .bind(smtp.contact_email.as_deref())
                .bind(smtp.use_tls)
                .execute(&mut *tx)
                .await
                .context("inserting smtp config")?;
                report.smtp_written = true;
            }
        }

        for ind in &seed.industries {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM industry WHERE name = ?")
                .bind(ind.name.trim())
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_some() {
                report.industries_existing += 1;
                continue;
            }
            insert_industry(&mut tx, ind)
                .await
                .with_context(|| format!("seeding industry {}", ind.name))?;
            report.industries_created += 1;
        }

        tx.commit().await?;
        Ok(report)
    }
}

async fn insert_industry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ind: &SeedIndustry,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO industry (name, top_n, keywords) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(ind.name.trim())
    .bind(i64::try_from(ind.top_n).unwrap_or(10))
    .bind(ind.keywords.as_deref())
    .fetch_one(&mut **tx)
    .await?;

    for s in &ind.sources {
        sqlx::query(
            "INSERT INTO news_source (industry_id, name, url, link_selector, weight, keywords, language) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&s.name)
        .bind(s.url.trim())
        .bind(s.selector.as_deref())
        .bind(s.weight)
        .bind(s.keywords.as_deref())
        .bind(&s.language)
        .execute(&mut **tx)
        .await?;
    }
    for r in &ind.recipients {
        sqlx::query("INSERT INTO recipient (industry_id, email, name) VALUES (?, ?, ?)")
            .bind(id)
            .bind(r.email.trim())
            .bind(&r.name)
            .execute(&mut **tx)
            .await?;
    }
    for m in &ind.market_items {
        sqlx::query("INSERT INTO finance_item (industry_id, name, symbol, item_type) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(&m.name)
            .bind(m.symbol.trim())
            .bind(m.kind.as_str())
            .execute(&mut **tx)
            .await?;
    }
    for sch in &ind.schedules {
        sqlx::query(
            "INSERT INTO push_schedule (industry_id, push_type, hour, minute, enabled) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(sch.kind.as_str())
        .bind(i64::from(sch.hour))
        .bind(i64::from(sch.minute))
        .bind(sch.enabled)
        .execute(&mut **tx)
        .await?;
    }
    Ok(id)
}
