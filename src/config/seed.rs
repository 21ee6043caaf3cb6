// src/config/seed.rs
//! Bootstrap configuration file (TOML or JSON): industries with their sources,
//! recipients, market items and schedules, plus the SMTP account.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{MarketKind, PushKind};

const ENV_PATH: &str = "SEED_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub smtp: Option<SeedSmtp>,
    #[serde(default)]
    pub industries: Vec<SeedIndustry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSmtp {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    /// Plaintext; encrypted before it is stored.
    pub password: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedIndustry {
    pub name: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub sources: Vec<SeedSource>,
    #[serde(default)]
    pub recipients: Vec<SeedRecipient>,
    #[serde(default)]
    pub market_items: Vec<SeedMarketItem>,
    #[serde(default)]
    pub schedules: Vec<SeedSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecipient {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedMarketItem {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_market_kind")]
    pub kind: MarketKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSchedule {
    pub kind: PushKind,
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_smtp_port() -> u16 {
    465
}
fn default_true() -> bool {
    true
}
fn default_top_n() -> usize {
    10
}
fn default_weight() -> i64 {
    5
}
fn default_language() -> String {
    "zh".to_string()
}
fn default_market_kind() -> MarketKind {
    MarketKind::Stock
}

/// Load a seed file from an explicit path. Format follows the extension, with
/// content sniffing as a fallback.
pub fn load_seed_from(path: &Path) -> Result<SeedFile> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading seed from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let seed = parse_seed(&content, ext.as_str())?;
    validate(&seed)?;
    Ok(seed)
}

/// Resolve the seed file:
/// 1) explicit path (usually `$SEED_CONFIG_PATH`)
/// 2) config/seed.toml
/// 3) config/seed.json
///
/// `Ok(None)` when none of them exist.
pub fn load_seed_default(explicit: Option<&str>) -> Result<Option<SeedFile>> {
    let explicit = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_PATH).ok())
        .filter(|p| !p.trim().is_empty());
    if let Some(p) = explicit {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_seed_from(&pb).map(Some);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    for candidate in ["config/seed.toml", "config/seed.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_seed_from(&pb).map(Some);
        }
    }
    Ok(None)
}

fn parse_seed(s: &str, hint_ext: &str) -> Result<SeedFile> {
    let looks_json = s.trim_start().starts_with('{');
    if hint_ext == "json" || (hint_ext != "toml" && looks_json) {
        if let Ok(v) = serde_json::from_str::<SeedFile>(s) {
            return Ok(v);
        }
    }
    match toml::from_str::<SeedFile>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str::<SeedFile>(s)
            .map_err(|_| anyhow!("unsupported seed format: {toml_err}")),
    }
}

fn validate(seed: &SeedFile) -> Result<()> {
    for ind in &seed.industries {
        if ind.name.trim().is_empty() {
            return Err(anyhow!("industry with empty name"));
        }
        for src in &ind.sources {
            if !(1..=10).contains(&src.weight) {
                return Err(anyhow!(
                    "source {} weight {} outside 1..=10",
                    src.name,
                    src.weight
                ));
            }
        }
        for sch in &ind.schedules {
            if sch.hour > 23 || sch.minute > 59 {
                return Err(anyhow!(
                    "schedule {:02}:{:02} for {} is not a valid time",
                    sch.hour,
                    sch.minute,
                    ind.name
                ));
            }
        }
    }
    Ok(())
}
