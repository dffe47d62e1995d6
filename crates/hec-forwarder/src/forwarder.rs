// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires configuration into a running pipeline.

use crate::batcher::Batcher;
use crate::config::ForwarderConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::ForwarderError;
use crate::health::{AlwaysHealthy, HealthCheck, HttpHealthChecker};
use crate::http::get_client;
use crate::queue::{DurableQueue, ObjectStoreQueue};
use crate::retry::RetryLoop;
use crate::sink::{Deliver, DryRunSink, HecSink};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What one [`Forwarder::run`] did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines_read: u64,
    pub blank_lines: u64,
    pub documents_flushed: u64,
    pub delivered: u64,
    /// Parked in the durable queue for the retry loop
    pub queued: u64,
    pub lost: u64,
}

pub struct Forwarder {
    config: ForwarderConfig,
    deliver: Arc<dyn Deliver>,
    queue: Arc<dyn DurableQueue>,
    cancel_token: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl Forwarder {
    /// Validates `config`, builds every collaborator and starts the retry loop
    /// (and the health poller when a health URL is set).
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        config.validate()?;
        info!(
            "Starting forwarder env={} hostname={} workers={} batch_size={} dry_run={}",
            config.env, config.hostname, config.workers, config.batch_size, config.dry_run
        );

        let cancel_token = CancellationToken::new();
        let mut background = Vec::new();

        if config.dry_run {
            info!("Dry run enabled, nothing will be sent");
            let queue = Arc::new(ObjectStoreQueue::in_memory(&config.queue_prefix));
            return Ok(Self::with_components(
                config,
                Arc::new(DryRunSink),
                queue,
                Arc::new(AlwaysHealthy),
                cancel_token,
            ));
        }

        let client = get_client(&config)?;
        let sink = HecSink::new(client.clone(), config.url.clone(), &config.token)
            .map_err(|e| ForwarderError::Client(e.to_string()))?;
        let queue: Arc<dyn DurableQueue> = Arc::new(ObjectStoreQueue::from_config(&config)?);

        let health: Arc<dyn HealthCheck> = match &config.health_url {
            Some(url) => {
                let (checker, handle) = HttpHealthChecker::spawn(
                    client,
                    url.clone(),
                    config.health_interval,
                    cancel_token.child_token(),
                );
                background.push(handle);
                Arc::new(checker)
            }
            None => {
                debug!("HEALTH | No health URL configured, assuming the sink is healthy");
                Arc::new(AlwaysHealthy)
            }
        };

        let mut forwarder =
            Self::with_components(config, Arc::new(sink), queue, health, cancel_token);
        forwarder.background.extend(background);
        Ok(forwarder)
    }

    /// Builds a forwarder around caller-provided collaborators and starts its
    /// retry loop. Must be called inside a tokio runtime.
    pub fn with_components(
        config: ForwarderConfig,
        deliver: Arc<dyn Deliver>,
        queue: Arc<dyn DurableQueue>,
        health: Arc<dyn HealthCheck>,
        cancel_token: CancellationToken,
    ) -> Self {
        let retry = RetryLoop::new(
            Arc::clone(&deliver),
            health,
            Arc::clone(&queue),
            cancel_token.child_token(),
        )
        .with_page_size(config.retry_page_size);

        Self {
            config,
            deliver,
            queue,
            cancel_token,
            background: vec![retry.spawn()],
        }
    }

    #[must_use]
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Token that stops the retry loop and the health poller.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Forwards `reader` until end of input.
    ///
    /// Every flushed document has been attempted (and parked on failure) by the
    /// time this returns, including when reading fails.
    pub async fn run<R>(&self, reader: R) -> Result<RunSummary, ForwarderError>
    where
        R: AsyncRead + Unpin,
    {
        let mut dispatcher = Dispatcher::start(
            self.config.workers,
            self.config.buffer,
            Arc::clone(&self.deliver),
            Arc::clone(&self.queue),
        );

        let batcher = Batcher::new(self.config.batch_size, self.config.batch_timer);
        let result = batcher.run(reader, &dispatcher).await;
        let dispatched = dispatcher.stop().await;

        let batched = match result {
            Ok(counts) => counts,
            Err(e) => {
                error!("Stopping on input error: {e}");
                return Err(e);
            }
        };

        let summary = RunSummary {
            lines_read: batched.lines,
            blank_lines: batched.skipped,
            documents_flushed: batched.documents,
            delivered: dispatched.delivered,
            queued: dispatched.queued,
            lost: dispatched.lost,
        };
        info!(
            "Input drained: {} lines, {} documents, {} delivered, {} parked, {} lost",
            summary.lines_read,
            summary.documents_flushed,
            summary.delivered,
            summary.queued,
            summary.lost
        );
        Ok(summary)
    }

    /// Stops the retry loop and the health poller and waits for both.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for handle in self.background {
            if let Err(e) = handle.await {
                error!("Background task terminated abnormally: {e}");
            }
        }
        debug!("Background tasks stopped");
    }
}
