//! Enrichment run configuration
//!
//! Loaded from the environment (and `.env` when present):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ENRICH_API_KEYS` | required, comma separated |
//! | `ENRICH_DAILY_LIMIT` | 5000 |
//! | `ENRICH_API_BASE_URL` | [`DEFAULT_BASE_URL`] |
//! | `ENRICH_REQUEST_TIMEOUT_SECS` | 10 |
//! | `ENRICH_QUOTA_ERROR_CODES` | 10 |
//! | `ENRICH_BATCH_SIZE` | 500 |
//! | `ENRICH_MAX_RETRIES` | 3 |
//! | `ENRICH_RETRY_DELAY_MS` | 500 |
//! | `ENRICH_ERROR_MESSAGE_MAX_LEN` | 500 |

use catalog_common::{CatalogError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::enrich::batch::{
    BatchExecutor, RetryPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY,
    MAX_CHUNK_SIZE,
};
use crate::enrich::lookup::{HttpLookupConfig, DEFAULT_BASE_URL, DEFAULT_QUOTA_ERROR_CODE};
use crate::enrich::persistence::DEFAULT_ERROR_MESSAGE_MAX_LEN;
use crate::enrich::quota::Credential;

pub const DEFAULT_DAILY_LIMIT: u32 = 5000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct EnrichConfig {
    pub api_keys: Vec<String>,
    /// Calls allowed per credential per run
    pub daily_limit: u32,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub quota_error_codes: Vec<i64>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub error_message_max_len: usize,
}

impl EnrichConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_source<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys: Vec<String> = get("ENRICH_API_KEYS")
            .ok_or(CatalogError::MissingEnv("ENRICH_API_KEYS"))?
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        let quota_error_codes = match get("ENRICH_QUOTA_ERROR_CODES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| {
                    c.parse().map_err(|_| CatalogError::InvalidEnv {
                        name: "ENRICH_QUOTA_ERROR_CODES",
                        value: raw.clone(),
                    })
                })
                .collect::<Result<Vec<i64>>>()?,
            None => vec![DEFAULT_QUOTA_ERROR_CODE],
        };

        let config = Self {
            api_keys,
            daily_limit: parse_or(&get, "ENRICH_DAILY_LIMIT", DEFAULT_DAILY_LIMIT)?,
            base_url: get("ENRICH_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            request_timeout_secs: parse_or(
                &get,
                "ENRICH_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            quota_error_codes,
            batch_size: parse_or(&get, "ENRICH_BATCH_SIZE", DEFAULT_CHUNK_SIZE)?,
            max_retries: parse_or(&get, "ENRICH_MAX_RETRIES", DEFAULT_MAX_ATTEMPTS)?,
            retry_delay_ms: parse_or(
                &get,
                "ENRICH_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY.as_millis() as u64,
            )?,
            error_message_max_len: parse_or(
                &get,
                "ENRICH_ERROR_MESSAGE_MAX_LEN",
                DEFAULT_ERROR_MESSAGE_MAX_LEN,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            return Err(CatalogError::config("at least one API key is required"));
        }
        if self.daily_limit == 0 {
            return Err(CatalogError::config("daily limit must be greater than 0"));
        }
        if self.base_url.is_empty() {
            return Err(CatalogError::config("API base URL cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(CatalogError::config("batch size must be greater than 0"));
        }
        if self.batch_size > MAX_CHUNK_SIZE {
            return Err(CatalogError::config(format!(
                "batch size must be at most {MAX_CHUNK_SIZE}"
            )));
        }
        if self.max_retries == 0 {
            return Err(CatalogError::config("max retries must be at least 1"));
        }
        if self.error_message_max_len == 0 {
            return Err(CatalogError::config("error message length must be greater than 0"));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Vec<Credential> {
        Credential::from_keys(self.api_keys.iter().cloned())
    }

    pub fn lookup_config(&self) -> HttpLookupConfig {
        HttpLookupConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            quota_error_codes: self.quota_error_codes.clone(),
        }
    }

    pub fn batch_executor(&self) -> BatchExecutor {
        BatchExecutor::new(
            self.batch_size,
            RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms)),
        )
    }
}

impl fmt::Debug for EnrichConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichConfig")
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .field("daily_limit", &self.daily_limit)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("quota_error_codes", &self.quota_error_codes)
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("error_message_max_len", &self.error_message_max_len)
            .finish()
    }
}

fn parse_or<F, T>(get: &F, name: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CatalogError::InvalidEnv { name, value: raw }),
        None => Ok(default),
    }
}
