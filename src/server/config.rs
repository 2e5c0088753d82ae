//! Server configuration read from the environment

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub bolna_api_key: String,
    pub bolna_base_url: String,
    pub bolna_from_number: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub default_country_code: String,
    pub webhook_settle_delay: Duration,
    pub scheduler_poll_interval: Duration,
    pub scheduler_batch_size: i64,
    pub cache_ttl: Duration,
    pub cache_refresh_ratio: f64,
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = optional("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = optional("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set, using an insecure development secret");
            "dev-secret-change-me".to_string()
        });

        let cache_refresh_ratio: f64 = parsed("CACHE_REFRESH_RATIO", 0.8)?;
        if !(0.0..=1.0).contains(&cache_refresh_ratio) {
            return Err(ConfigError::Invalid {
                name: "CACHE_REFRESH_RATIO",
                value: cache_refresh_ratio.to_string(),
            });
        }

        let default_country_code = optional("DEFAULT_COUNTRY_CODE").unwrap_or_else(|| "+91".to_string());
        if !default_country_code.starts_with('+') || default_country_code.len() < 2 {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_COUNTRY_CODE",
                value: default_country_code,
            });
        }

        Ok(Self {
            database_url,
            port: parsed("PORT", 3000)?,
            jwt_secret,
            session_ttl_hours: parsed("SESSION_TTL_HOURS", 24)?,
            bolna_api_key: optional("BOLNA_API_KEY").unwrap_or_default(),
            bolna_base_url: optional("BOLNA_BASE_URL").unwrap_or_else(|| "https://api.bolna.ai".to_string()),
            bolna_from_number: optional("BOLNA_FROM_NUMBER"),
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_model: optional("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            default_country_code,
            webhook_settle_delay: Duration::from_millis(parsed("WEBHOOK_SETTLE_DELAY_MS", 2000)?),
            scheduler_poll_interval: Duration::from_secs(parsed("SCHEDULER_POLL_SECS", 30)?),
            scheduler_batch_size: parsed("SCHEDULER_BATCH_SIZE", 10)?,
            cache_ttl: Duration::from_secs(parsed("CACHE_TTL_SECS", 300)?),
            cache_refresh_ratio,
        })
    }
}
