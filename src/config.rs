//! Environment configuration.
//!
//! Everything is environment-only. Numeric knobs fall back to their
//! defaults when unset or unparseable; the two settings that guard
//! correctness (`API_KEY`, and the pseudonymisation salt when
//! pseudonymisation is enabled) are fatal when missing.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|&v| v > 0.0)
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_api_key() -> Result<String> {
    let key = env::var("API_KEY").context("API_KEY must be set")?;
    if key.trim().is_empty() {
        bail!("API_KEY must not be empty");
    }
    Ok(key)
}

/// Shared settings for the worker and aggregator services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Preshared key expected in the `X-Api-Key` header.
    pub api_key: String,
    /// Idempotency cache capacity (entries).
    pub cache_size: usize,
    /// Per-client request budget per minute; health probes are exempt.
    pub rate_limit_per_minute: u32,
    /// Request payload cap, rejected before parsing.
    pub max_request_size_mb: usize,
    /// Event-list cap, rejected after parsing.
    pub max_events_per_request: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            api_key: required_api_key()?,
            cache_size: env_u64("CACHE_SIZE", 1000) as usize,
            rate_limit_per_minute: env_u64("RATE_LIMIT_PER_MINUTE", 100) as u32,
            max_request_size_mb: env_u64("MAX_REQUEST_SIZE_MB", 10) as usize,
            max_events_per_request: env_u64("MAX_EVENTS_PER_REQUEST", 100_000) as usize,
        })
    }

    pub fn max_request_size_bytes(&self) -> usize {
        self.max_request_size_mb * 1024 * 1024
    }
}

/// Coordinator settings: worker endpoints plus the retry policy.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub api_key: String,
    /// Additional attempts after the first (total attempts = retries + 1).
    pub max_retries: u32,
    /// Sleep before retry `n` is `base^n` seconds (base 2: 1 s, 2 s, 4 s).
    pub retry_backoff_base_seconds: f64,
    /// Per-attempt deadline for a worker call.
    pub algorithm_timeout: Duration,
    pub layering_worker_url: String,
    pub wash_trading_worker_url: String,
    pub aggregator_url: String,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            api_key: required_api_key()?,
            max_retries: env_u64("MAX_RETRIES", 3) as u32,
            retry_backoff_base_seconds: env_f64("RETRY_BACKOFF_BASE_SECONDS", 2.0),
            algorithm_timeout: Duration::from_secs(env_u64("ALGORITHM_TIMEOUT_SECONDS", 30)),
            layering_worker_url: env_string("LAYERING_WORKER_URL", "http://127.0.0.1:8081"),
            wash_trading_worker_url: env_string(
                "WASH_TRADING_WORKER_URL",
                "http://127.0.0.1:8082",
            ),
            aggregator_url: env_string("AGGREGATOR_URL", "http://127.0.0.1:8083"),
        })
    }
}

/// Aggregator settings: completeness policy and artefact output.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub api_key: String,
    /// Fail closed when an expected service is missing or non-final.
    pub validation_strict: bool,
    /// Merge whatever succeeded instead of failing on an incomplete set.
    pub allow_partial_results: bool,
    pub output_dir: PathBuf,
    /// One-way account-id transform for the detection log; `Some(salt)`
    /// when enabled.
    pub pseudonymization_salt: Option<String>,
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let pseudonymization_salt = if env_bool("PSEUDONYMIZE_ACCOUNT_IDS", false) {
            let salt = env::var("PSEUDONYMIZATION_SALT").context(
                "PSEUDONYMIZATION_SALT must be set when PSEUDONYMIZE_ACCOUNT_IDS is enabled",
            )?;
            if salt.trim().is_empty() {
                bail!("PSEUDONYMIZATION_SALT must not be empty");
            }
            Some(salt)
        } else {
            None
        };

        Ok(Self {
            api_key: required_api_key()?,
            validation_strict: env_bool("VALIDATION_STRICT", true),
            allow_partial_results: env_bool("ALLOW_PARTIAL_RESULTS", false),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "./output")),
            pseudonymization_salt,
        })
    }
}
