use serde::Deserialize;

use crate::consolidation::{MergePolicy, TokenOverlap};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    /// Shared secret expected in `X-Ingest-Token` on run ingestion.
    pub ingest_webhook_secret: Option<String>,
    pub merge_min_chars: usize,
    pub merge_max_attempts: usize,
    pub duplicate_overlap_threshold: f64,
    pub report_cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            port: 3000,
            db_max_connections: 10,
            run_migrations: true,
            ingest_webhook_secret: None,
            merge_min_chars: 1000,
            merge_max_attempts: 3,
            duplicate_overlap_threshold: 0.5,
            report_cache_ttl_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    validate_database_url(&url)?;
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            db_max_connections: match std::env::var("DB_MAX_CONNECTIONS") {
                Ok(raw) => raw
                    .parse()
                    .ok()
                    .filter(|n: &u32| *n > 0)
                    .ok_or_else(|| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive integer"))?,
                Err(_) => defaults.db_max_connections,
            },
            run_migrations: match std::env::var("RUN_MIGRATIONS") {
                Ok(raw) => parse_bool(&raw)
                    .ok_or_else(|| anyhow::anyhow!("RUN_MIGRATIONS must be true or false"))?,
                Err(_) => defaults.run_migrations,
            },
            ingest_webhook_secret: std::env::var("INGEST_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            merge_min_chars: match std::env::var("MERGE_MIN_CHARS") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("MERGE_MIN_CHARS must be a non-negative integer"))?,
                Err(_) => defaults.merge_min_chars,
            },
            merge_max_attempts: match std::env::var("MERGE_MAX_ATTEMPTS") {
                Ok(raw) => raw
                    .parse()
                    .ok()
                    .filter(|n: &usize| *n >= 1)
                    .ok_or_else(|| anyhow::anyhow!("MERGE_MAX_ATTEMPTS must be at least 1"))?,
                Err(_) => defaults.merge_max_attempts,
            },
            duplicate_overlap_threshold: match std::env::var("DUPLICATE_OVERLAP_THRESHOLD") {
                Ok(raw) => raw
                    .parse()
                    .ok()
                    .filter(|t: &f64| *t > 0.0 && *t <= 1.0)
                    .ok_or_else(|| {
                        anyhow::anyhow!("DUPLICATE_OVERLAP_THRESHOLD must be in (0, 1]")
                    })?,
                Err(_) => defaults.duplicate_overlap_threshold,
            },
            report_cache_ttl_secs: match std::env::var("REPORT_CACHE_TTL_SECS") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("REPORT_CACHE_TTL_SECS must be a number of seconds"))?,
                Err(_) => defaults.report_cache_ttl_secs,
            },
        };

        if config.ingest_webhook_secret.is_none() {
            tracing::warn!("INGEST_WEBHOOK_SECRET not set, run ingestion is unauthenticated");
        }

        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Merge policy: min_chars={}, max_attempts={}, overlap_threshold={}",
            config.merge_min_chars,
            config.merge_max_attempts,
            config.duplicate_overlap_threshold
        );

        Ok(config)
    }

    /// Merge thresholds used by the extraction selector.
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            min_chars: self.merge_min_chars,
            max_attempts: self.merge_max_attempts,
        }
    }

    pub fn duplicate_detector(&self) -> TokenOverlap {
        TokenOverlap {
            threshold: self.duplicate_overlap_threshold,
        }
    }
}

fn validate_database_url(url: &str) -> anyhow::Result<()> {
    if url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL cannot be empty");
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| anyhow::anyhow!("DATABASE_URL is not a valid URL: {}", e))?;
    if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
