// Worker configuration from environment variables

use std::time::Duration;

use anyhow::{bail, Context, Result};
use drainer_core::consumer::MAX_BATCH_SIZE;

/// Longest long-poll wait SQS accepts
pub const MAX_QUEUE_WAIT_SECONDS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Control plane base URL; `/graphql` is appended
    pub control_plane_endpoint: String,
    pub api_key_id: String,
    /// SSM parameter holding the API key secret
    pub api_key_secret_name: String,
    pub worker_pool_id: String,
    pub queue_url: String,
    pub http_timeout: Duration,
    pub batch_size: usize,
    pub wait_seconds: u32,
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Required:
    /// - `CONTROL_PLANE_ENDPOINT`
    /// - `CONTROL_PLANE_API_KEY_ID`
    /// - `CONTROL_PLANE_API_KEY_SECRET_NAME`
    /// - `WORKER_POOL_ID`
    /// - `QUEUE_URL`
    ///
    /// Optional:
    /// - `HTTP_TIMEOUT_SECONDS` (default: 30)
    /// - `QUEUE_BATCH_SIZE` (default: 10, max 10)
    /// - `QUEUE_WAIT_SECONDS` (default: 20, max 20)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                _ => bail!("{} must be set", key),
            }
        };

        let http_timeout_seconds: u64 = parse_or(&lookup, "HTTP_TIMEOUT_SECONDS", 30)?;
        let batch_size: usize = parse_or(&lookup, "QUEUE_BATCH_SIZE", MAX_BATCH_SIZE)?;
        let wait_seconds: u32 = parse_or(&lookup, "QUEUE_WAIT_SECONDS", MAX_QUEUE_WAIT_SECONDS)?;

        Ok(Self {
            control_plane_endpoint: required("CONTROL_PLANE_ENDPOINT")?,
            api_key_id: required("CONTROL_PLANE_API_KEY_ID")?,
            api_key_secret_name: required("CONTROL_PLANE_API_KEY_SECRET_NAME")?,
            worker_pool_id: required("WORKER_POOL_ID")?,
            queue_url: required("QUEUE_URL")?,
            http_timeout: Duration::from_secs(http_timeout_seconds.max(1)),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            wait_seconds: wait_seconds.min(MAX_QUEUE_WAIT_SECONDS),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, raw)),
        _ => Ok(default),
    }
}
