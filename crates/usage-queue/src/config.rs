// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::flusher::{FlusherConfig, RetryPolicy};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the usage queue service
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Whether ingestion is enabled when the service starts
    pub ingest_enabled: bool,
    /// Period of the background flush loop
    pub flush_interval: Duration,
    /// Minimum age before an item is flushed on a scheduled cycle
    pub flush_window: Duration,
    /// Items older than this are evicted; `None` keeps them until delivered
    pub max_item_age: Option<Duration>,
    /// Buffer size that forces a full flush
    pub max_buffered_items: usize,
    pub retry: RetryPolicy,
    /// Base URL of the usage intake, e.g. `https://usage.example.com`
    pub intake_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    /// zstd level for request bodies; `None` sends them uncompressed
    pub compression_level: Option<i32>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingest_enabled: true,
            flush_interval: Duration::from_secs(10),
            flush_window: Duration::from_secs(10),
            max_item_age: Some(Duration::from_secs(3600)),
            max_buffered_items: 50_000,
            retry: RetryPolicy::default(),
            intake_url: None,
            api_key: None,
            request_timeout: Duration::from_secs(5),
            compression_level: None,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

impl QueueConfig {
    /// Create configuration from environment variables
    ///
    /// Unset or unparseable numeric values fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ingest_enabled = env::var("USAGE_QUEUE_ENABLED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.ingest_enabled);
        let flush_interval = parse_env("USAGE_QUEUE_FLUSH_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_interval);
        let flush_window = parse_env("USAGE_QUEUE_FLUSH_WINDOW_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_window);
        let max_item_age = match parse_env::<u64>("USAGE_QUEUE_MAX_ITEM_AGE_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.max_item_age,
        };
        let max_buffered_items =
            parse_env("USAGE_QUEUE_MAX_BUFFERED_ITEMS").unwrap_or(defaults.max_buffered_items);
        let retry = RetryPolicy {
            max_retries: parse_env("USAGE_QUEUE_MAX_RETRIES")
                .unwrap_or(defaults.retry.max_retries),
            backoff_base: parse_env("USAGE_QUEUE_RETRY_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.backoff_base),
            backoff_max: parse_env("USAGE_QUEUE_RETRY_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.backoff_max),
        };
        let intake_url = non_empty_env("USAGE_QUEUE_INTAKE_URL")
            .map(|url| url.trim_end_matches('/').to_string());
        let api_key = non_empty_env("USAGE_QUEUE_API_KEY");
        let request_timeout = parse_env("USAGE_QUEUE_REQUEST_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let compression_level = parse_env("USAGE_QUEUE_COMPRESSION_LEVEL");
        let https_proxy = non_empty_env("USAGE_QUEUE_PROXY_HTTPS")
            .or_else(|| non_empty_env("HTTPS_PROXY"));
        let log_level = env::var("USAGE_QUEUE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            ingest_enabled,
            flush_interval,
            flush_window,
            max_item_age,
            max_buffered_items,
            retry,
            intake_url,
            api_key,
            request_timeout,
            compression_level,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if self.max_buffered_items == 0 {
            return Err(ConfigError::Invalid(
                "max buffered items must be greater than 0".to_string(),
            ));
        }

        if let Some(age) = self.max_item_age {
            // Anything old enough to flush would already be evicted.
            if age <= self.flush_window {
                return Err(ConfigError::Invalid(format!(
                    "max item age ({age:?}) must exceed the flush window ({:?})",
                    self.flush_window
                )));
            }
        }

        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(ConfigError::Invalid(format!(
                "retry backoff base ({:?}) exceeds backoff max ({:?})",
                self.retry.backoff_base, self.retry.backoff_max
            )));
        }

        if let Some(level) = self.compression_level {
            if !(1..=22).contains(&level) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid compression level {level}. Must be between 1 and 22"
                )));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn flusher_config(&self) -> FlusherConfig {
        FlusherConfig {
            flush_window: self.flush_window,
            max_item_age: self.max_item_age,
            max_buffered_items: self.max_buffered_items,
            retry: self.retry,
        }
    }
}
