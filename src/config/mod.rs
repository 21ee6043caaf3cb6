// src/config/mod.rs
//! Runtime configuration from the environment (`.env` is loaded by the entrypoint).

pub mod seed;

use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/app.db";
pub const DEFAULT_AI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub fernet_key: Option<String>,
    pub ai: AiSettings,
    pub dedup_threshold: f32,
    /// Offset applied to schedule hours (8 = UTC+8).
    pub schedule_utc_offset_hours: i32,
    pub health_check_cron: String,
    pub retention_cron: String,
    pub seed_path: Option<String>,
    pub crawl_detail_concurrency: usize,
    pub health_concurrency: usize,
}

#[derive(Clone)]
pub struct AiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub summary_model: String,
    pub embedding_model: String,
}

impl std::fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_base", &self.api_base)
            .field("summary_model", &self.summary_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl AiSettings {
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            fernet_key: None,
            ai: AiSettings {
                api_key: None,
                api_base: DEFAULT_AI_API_BASE.to_string(),
                summary_model: "gpt-4o-mini".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
            },
            dedup_threshold: 0.85,
            schedule_utc_offset_hours: 8,
            health_check_cron: "0 0 */6 * * *".to_string(),
            retention_cron: "0 30 3 * * *".to_string(),
            seed_path: None,
            crawl_detail_concurrency: 5,
            health_concurrency: 5,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let api_key = non_empty("AI_API_KEY").or_else(|| non_empty("OPENAI_API_KEY"));
        let dedup_threshold = env::var("DEDUP_THRESHOLD")
            .ok()
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(d.dedup_threshold);
        let schedule_utc_offset_hours = env::var("SCHEDULE_UTC_OFFSET_HOURS")
            .ok()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|h| (-14..=14).contains(h))
            .unwrap_or(d.schedule_utc_offset_hours);

        Self {
            database_url: non_empty("DATABASE_URL").unwrap_or(d.database_url),
            fernet_key: non_empty("FERNET_KEY"),
            ai: AiSettings {
                api_key,
                api_base: non_empty("AI_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or(d.ai.api_base),
                summary_model: non_empty("AI_SUMMARY_MODEL").unwrap_or(d.ai.summary_model),
                embedding_model: non_empty("AI_EMBEDDING_MODEL").unwrap_or(d.ai.embedding_model),
            },
            dedup_threshold,
            schedule_utc_offset_hours,
            health_check_cron: non_empty("HEALTH_CHECK_CRON").unwrap_or(d.health_check_cron),
            retention_cron: non_empty("RETENTION_CRON").unwrap_or(d.retention_cron),
            seed_path: non_empty("SEED_CONFIG_PATH"),
            crawl_detail_concurrency: positive("CRAWL_DETAIL_CONCURRENCY")
                .unwrap_or(d.crawl_detail_concurrency),
            health_concurrency: positive("HEALTH_CONCURRENCY").unwrap_or(d.health_concurrency),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}
