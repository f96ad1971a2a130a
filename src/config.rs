use crate::domain::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub min_eligible_balance: Decimal,
    pub populate_concurrency: usize,
    pub balance_fetch_concurrency: usize,
    /// A claimed partition whose run has not finished after this long is
    /// treated as abandoned and can be claimed without forcing.
    pub claim_timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_MIN_ELIGIBLE_BALANCE: i64 = 10_000;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let min_eligible_balance = match env_map.get("MIN_ELIGIBLE_BALANCE") {
            Some(raw) => Decimal::from_str_canonical(raw).map_err(|_| {
                ConfigError::InvalidValue(
                    "MIN_ELIGIBLE_BALANCE".to_string(),
                    "must be a decimal number".to_string(),
                )
            })?,
            None => Decimal::from(DEFAULT_MIN_ELIGIBLE_BALANCE),
        };
        if min_eligible_balance.is_negative() {
            return Err(ConfigError::InvalidValue(
                "MIN_ELIGIBLE_BALANCE".to_string(),
                "must not be negative".to_string(),
            ));
        }

        let populate_concurrency = parse_positive(&env_map, "POPULATE_CONCURRENCY", 4)?;
        let balance_fetch_concurrency =
            parse_positive(&env_map, "BALANCE_FETCH_CONCURRENCY", 8)?;
        let claim_timeout_secs = parse_positive(&env_map, "CLAIM_TIMEOUT_SECS", 3600)? as u64;

        Ok(Config {
            database_path,
            min_eligible_balance,
            populate_concurrency,
            balance_fetch_concurrency,
            claim_timeout_secs,
        })
    }
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = env_map.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a positive integer".to_string(),
        )),
    }
}
