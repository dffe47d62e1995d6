// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the forwarding pipeline.
//!
//! Only [`ConfigError`] and the input variant of [`ForwarderError`] ever leave
//! the pipeline. Delivery and queue errors are handled where they happen: logged,
//! and the affected document is parked in the durable queue where possible.

use reqwest::StatusCode;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be provided")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A single delivery attempt against the sink failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to reach sink: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status code {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to build request: {0}")]
    Request(String),
}

/// The durable queue could not store or return documents.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("durable store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("failed to set up durable store: {0}")]
    Setup(String),
}

/// Process-level failures surfaced by [`crate::Forwarder`].
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
