// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of usage batches.
//!
//! Each batch becomes one `POST {intake_url}/api/v1/usage` carrying
//!
//! ```json
//! {"account_id": "...", "namespace": "...", "data": [ ... ]}
//! ```
//!
//! optionally zstd-compressed. The response status decides whether a failed
//! batch is worth retrying.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::config::QueueConfig;
use crate::errors::{ConfigError, DispatchError};
use crate::flusher::{Batch, Dispatcher};

const USAGE_PATH: &str = "/api/v1/usage";
const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Serialize)]
struct UsageRequest<'a, P> {
    account_id: &'a str,
    namespace: &'a str,
    data: Vec<&'a P>,
}

/// Builds a reqwest client with optional proxy configuration and timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        let proxy =
            reqwest::Proxy::https(proxy).map_err(|e| ConfigError::Client(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    compression_level: Option<i32>,
}

impl HttpDispatcher {
    pub fn new(config: &QueueConfig) -> Result<Self, ConfigError> {
        let Some(intake_url) = config.intake_url.as_deref() else {
            return Err(ConfigError::Invalid(
                "an intake URL is required for HTTP delivery".to_string(),
            ));
        };
        let client = build_client(config.https_proxy.as_deref(), config.request_timeout)?;
        Ok(Self {
            client,
            endpoint: format!("{}{USAGE_PATH}", intake_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            compression_level: config.compression_level,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn encode<P: Serialize>(&self, batch: &Batch<P>) -> Result<Vec<u8>, DispatchError> {
        let request = UsageRequest {
            account_id: &batch.key().account_id,
            namespace: &batch.key().namespace,
            data: batch.payloads().collect(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| DispatchError::Permanent(format!("failed to serialize batch: {e}")))?;
        match self.compression_level {
            Some(level) => zstd::encode_all(body.as_slice(), level)
                .map_err(|e| DispatchError::Permanent(format!("failed to compress batch: {e}"))),
            None => Ok(body),
        }
    }
}

/// Maps an intake response status to a dispatch result.
pub fn classify_status(status: StatusCode) -> Result<(), DispatchError> {
    if status.is_success() {
        return Ok(());
    }
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        Err(DispatchError::Transient(format!("intake responded {status}")))
    } else if status == StatusCode::FORBIDDEN {
        Err(DispatchError::Permanent(format!(
            "intake responded {status}, verify that the API key is valid"
        )))
    } else {
        Err(DispatchError::Permanent(format!("intake responded {status}")))
    }
}

#[async_trait]
impl<P> Dispatcher<P> for HttpDispatcher
where
    P: Serialize + Send + Sync,
{
    async fn dispatch(&self, batch: &Batch<P>) -> Result<(), DispatchError> {
        let body = self.encode(batch)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }
        if self.compression_level.is_some() {
            request = request.header(CONTENT_ENCODING, "zstd");
        }

        let start = Instant::now();
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(format!("request failed: {e}")))?;
        let status = response.status();
        debug!(
            batch = %batch.key(),
            items = batch.len(),
            "Intake responded {} after {} ms",
            status,
            start.elapsed().as_millis()
        );
        classify_status(status)
    }
}
