// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery action shared by the dispatcher workers and the retry loop.

use crate::constants::AUTHORIZATION_SCHEME;
use crate::encoder::EncodedDocument;
use crate::errors::DeliveryError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Instant;
use tracing::{debug, error};

/// One delivery attempt of one document.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, document: &EncodedDocument) -> Result<(), DeliveryError>;
}

/// POSTs documents to an HTTP event collector. Only `200 OK` counts as delivered.
#[derive(Debug, Clone)]
pub struct HecSink {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HecSink {
    pub fn new(client: reqwest::Client, url: String, token: &str) -> Result<Self, DeliveryError> {
        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(&format!("{AUTHORIZATION_SCHEME} {token}"))
            .map_err(|e| DeliveryError::Request(format!("invalid token: {e}")))?;
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            url,
            headers,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Deliver for HecSink {
    async fn deliver(&self, document: &EncodedDocument) -> Result<(), DeliveryError> {
        let time = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(document.as_str().to_owned())
            .send()
            .await;
        let elapsed = time.elapsed();

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    "DISPATCH | Failed to reach {} after {} ms: {e}",
                    self.url,
                    elapsed.as_millis()
                );
                return Err(DeliveryError::Transport(e));
            }
        };

        let status = resp.status();
        // Reading the body also hands the connection back to the pool.
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::OK {
            debug!(
                "DISPATCH | Delivered {} bytes in {} ms",
                document.len(),
                elapsed.as_millis()
            );
            return Ok(());
        }

        error!(
            "DISPATCH | Unexpected status code {status} when sending {} bytes to {}: {body}",
            document.len(),
            self.url
        );
        Err(DeliveryError::Status { status, body })
    }
}

/// Delivery action for dry runs: nothing leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSink;

#[async_trait]
impl Deliver for DryRunSink {
    async fn deliver(&self, document: &EncodedDocument) -> Result<(), DeliveryError> {
        debug!(
            "DISPATCH | Dry run enabled, not posting {} bytes",
            document.len()
        );
        Ok(())
    }
}
