// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMER_SECS, DEFAULT_BUFFER, DEFAULT_ENV,
    DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_LOG_LEVEL, DEFAULT_QUEUE_PREFIX,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RETRY_PAGE_SIZE, DEFAULT_WORKERS, UNKNOWN_HOSTNAME,
};
use crate::errors::ConfigError;
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Where documents that failed delivery are parked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueLocation {
    /// Process-local store. Nothing survives a restart.
    Memory,
    /// Directory on the local filesystem.
    Local(PathBuf),
    /// S3 bucket; credentials come from the standard AWS environment.
    S3 { bucket: String, region: String },
}

/// Forwarder configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Sink endpoint documents are POSTed to
    pub url: String,
    /// Token sent as `Authorization: Splunk <token>`
    pub token: String,
    /// Environment tag
    pub env: String,
    /// Host running the forwarder
    pub hostname: String,
    /// Disables all outbound network effects
    pub dry_run: bool,
    /// Number of concurrent delivery workers
    pub workers: usize,
    /// Capacity of the queue between the batcher and the workers
    pub buffer: usize,
    /// Lines per batch
    pub batch_size: usize,
    /// Flush a partial batch after this long; `None` disables the timer
    pub batch_timer: Option<Duration>,
    /// Timeout of a single delivery attempt
    pub request_timeout: Duration,
    /// Accept invalid sink certificates
    pub tls_skip_verify: bool,
    pub queue: QueueLocation,
    pub queue_prefix: String,
    /// Probe endpoint; `None` means the sink is always considered healthy
    pub health_url: Option<String>,
    pub health_interval: Duration,
    /// Maximum documents redriven per retry cycle
    pub retry_page_size: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            env: DEFAULT_ENV.to_string(),
            hostname: UNKNOWN_HOSTNAME.to_string(),
            dry_run: false,
            workers: DEFAULT_WORKERS,
            buffer: DEFAULT_BUFFER,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timer: Some(Duration::from_secs(DEFAULT_BATCH_TIMER_SECS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            tls_skip_verify: false,
            queue: QueueLocation::Memory,
            queue_prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            health_url: None,
            health_interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
            retry_page_size: DEFAULT_RETRY_PAGE_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());
        let defaults = Self::default();

        let hostname = get("HEC_FORWARDER_HOSTNAME")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or(defaults.hostname);

        let batch_timer_secs: u64 = parse_or(
            get("HEC_FORWARDER_BATCH_TIMER_SECS"),
            "HEC_FORWARDER_BATCH_TIMER_SECS",
            DEFAULT_BATCH_TIMER_SECS,
        )?;

        let queue = match (
            get("HEC_FORWARDER_QUEUE_BUCKET"),
            get("HEC_FORWARDER_QUEUE_DIR"),
        ) {
            (Some(bucket), _) => QueueLocation::S3 {
                bucket,
                region: get("HEC_FORWARDER_QUEUE_REGION")
                    .ok_or(ConfigError::Missing("HEC_FORWARDER_QUEUE_REGION"))?,
            },
            (None, Some(dir)) => QueueLocation::Local(PathBuf::from(dir)),
            (None, None) => QueueLocation::Memory,
        };

        let config = Self {
            url: get("HEC_FORWARDER_URL").unwrap_or_default(),
            token: get("HEC_FORWARDER_TOKEN").unwrap_or_default(),
            env: get("HEC_FORWARDER_ENV").unwrap_or(defaults.env),
            hostname,
            dry_run: get("HEC_FORWARDER_DRY_RUN")
                .map(|val| parse_bool(&val))
                .unwrap_or(false),
            workers: parse_or(
                get("HEC_FORWARDER_WORKERS"),
                "HEC_FORWARDER_WORKERS",
                DEFAULT_WORKERS,
            )?,
            buffer: parse_or(
                get("HEC_FORWARDER_BUFFER"),
                "HEC_FORWARDER_BUFFER",
                DEFAULT_BUFFER,
            )?,
            batch_size: parse_or(
                get("HEC_FORWARDER_BATCH_SIZE"),
                "HEC_FORWARDER_BATCH_SIZE",
                DEFAULT_BATCH_SIZE,
            )?,
            batch_timer: (batch_timer_secs > 0).then(|| Duration::from_secs(batch_timer_secs)),
            request_timeout: Duration::from_secs(parse_or(
                get("HEC_FORWARDER_TIMEOUT_SECS"),
                "HEC_FORWARDER_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            tls_skip_verify: get("HEC_FORWARDER_TLS_SKIP_VERIFY")
                .map(|val| parse_bool(&val))
                .unwrap_or(false),
            queue,
            queue_prefix: get("HEC_FORWARDER_QUEUE_PREFIX").unwrap_or(defaults.queue_prefix),
            health_url: get("HEC_FORWARDER_HEALTH_URL"),
            health_interval: Duration::from_secs(parse_or(
                get("HEC_FORWARDER_HEALTH_INTERVAL_SECS"),
                "HEC_FORWARDER_HEALTH_INTERVAL_SECS",
                DEFAULT_HEALTH_INTERVAL_SECS,
            )?),
            retry_page_size: parse_or(
                get("HEC_FORWARDER_RETRY_PAGE_SIZE"),
                "HEC_FORWARDER_RETRY_PAGE_SIZE",
                DEFAULT_RETRY_PAGE_SIZE,
            )?,
            log_level: get("HEC_FORWARDER_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("HEC_FORWARDER_URL"));
        }
        if Url::parse(&self.url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "'{}' is not a valid URL",
                self.url
            )));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("HEC_FORWARDER_TOKEN"));
        }
        if let Some(health_url) = &self.health_url {
            if Url::parse(health_url).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "'{health_url}' is not a valid health check URL"
                )));
            }
        }

        for (name, value) in [
            ("workers", self.workers),
            ("buffer", self.buffer),
            ("batch size", self.batch_size),
            ("retry page size", self.retry_page_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.health_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health check interval must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{key} has invalid value '{raw}'"))),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
