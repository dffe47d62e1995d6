// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Health-gated redelivery of parked documents.
//!
//! Each cycle checks the sink health once. When healthy, a page of documents is
//! pulled from the durable queue and every document goes through the same
//! delivery action the dispatcher uses. Each outcome moves the backoff level by
//! one step, and the loop sleeps `scale * 2^level - offset` between documents.
//! A document that fails again is put back in the queue.

use crate::constants::{
    BACKOFF_OFFSET, BACKOFF_SCALE, DEFAULT_RETRY_PAGE_SIZE, INITIAL_BACKOFF_LEVEL,
    MAX_BACKOFF_LEVEL, MIN_BACKOFF_LEVEL, RETRY_POLL_INTERVAL,
};
use crate::encoder::EncodedDocument;
use crate::health::HealthCheck;
use crate::queue::DurableQueue;
use crate::sink::Deliver;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_level: u32,
    pub max_level: u32,
    pub initial_level: u32,
    pub scale: Duration,
    pub offset: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_level: MIN_BACKOFF_LEVEL,
            max_level: MAX_BACKOFF_LEVEL,
            initial_level: INITIAL_BACKOFF_LEVEL,
            scale: BACKOFF_SCALE,
            offset: BACKOFF_OFFSET,
        }
    }
}

/// Bounded backoff level. Always within `[min_level, max_level]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    config: BackoffConfig,
    level: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let max_level = config.max_level.max(config.min_level);
        let config = BackoffConfig {
            max_level,
            ..config
        };
        Self {
            level: config.initial_level.clamp(config.min_level, max_level),
            config,
        }
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn record_failure(&mut self) {
        if self.level < self.config.max_level {
            self.level += 1;
        }
    }

    pub fn record_success(&mut self) {
        if self.level > self.config.min_level {
            self.level -= 1;
        }
    }

    /// Pause before the next redelivery, never negative.
    #[must_use]
    pub fn delay(&self) -> Duration {
        let factor = 2u32.checked_pow(self.level).unwrap_or(u32::MAX);
        self.config
            .scale
            .saturating_mul(factor)
            .saturating_sub(self.config.offset)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Outcome of one [`RetryLoop::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub healthy: bool,
    pub retrieved: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Documents that could not be put back after failing again.
    pub lost: usize,
    pub level: u32,
}

pub struct RetryLoop {
    deliver: Arc<dyn Deliver>,
    health: Arc<dyn HealthCheck>,
    queue: Arc<dyn DurableQueue>,
    backoff: Backoff,
    page_size: usize,
    poll_interval: Duration,
    cancel_token: CancellationToken,
}

impl RetryLoop {
    pub fn new(
        deliver: Arc<dyn Deliver>,
        health: Arc<dyn HealthCheck>,
        queue: Arc<dyn DurableQueue>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            deliver,
            health,
            queue,
            backoff: Backoff::default(),
            page_size: DEFAULT_RETRY_PAGE_SIZE,
            poll_interval: RETRY_POLL_INTERVAL,
            cancel_token,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Backoff::new(config);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.backoff.level()
    }

    /// Runs one health check and, when healthy, redrives one page.
    ///
    /// If cancelled while pausing between documents, the rest of the page is put
    /// back in the queue and the cycle ends early.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport {
            healthy: self.health.status().healthy,
            level: self.backoff.level(),
            ..CycleReport::default()
        };

        if !report.healthy {
            debug!("RETRY | Sink unhealthy, skipping retrieval");
            return report;
        }

        let documents = match self.queue.list_and_delete(self.page_size).await {
            Ok(documents) => documents,
            Err(e) => {
                error!("RETRY | Failed to retrieve parked documents: {e}");
                return report;
            }
        };
        report.retrieved = documents.len();
        if documents.is_empty() {
            return report;
        }
        info!("RETRY | Redelivering {} parked documents", documents.len());

        let mut documents = documents.into_iter();
        while let Some(body) = documents.next() {
            let document = EncodedDocument::from(body);
            match self.deliver.deliver(&document).await {
                Ok(()) => {
                    self.backoff.record_success();
                    report.delivered += 1;
                }
                Err(e) => {
                    self.backoff.record_failure();
                    report.failed += 1;
                    warn!(
                        "RETRY | Redelivery failed, backoff level now {}: {e}",
                        self.backoff.level()
                    );
                    if !self.park(document.as_str()).await {
                        report.lost += 1;
                    }
                }
            }

            let delay = self.backoff.delay();
            debug!(
                "RETRY | Sleeping {} ms at level {}",
                delay.as_millis(),
                self.backoff.level()
            );
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let remaining: Vec<String> = documents.by_ref().collect();
                    info!("RETRY | Shutdown requested, parking {} documents", remaining.len());
                    for body in remaining {
                        if !self.park(&body).await {
                            report.lost += 1;
                        }
                    }
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        report.level = self.backoff.level();
        report
    }

    async fn park(&self, body: &str) -> bool {
        match self.queue.put(body).await {
            Ok(_) => true,
            Err(e) => {
                error!("RETRY | Failed to park document, it is lost: {e}");
                false
            }
        }
    }

    /// Repeats [`Self::run_cycle`] until the cancel token fires.
    pub async fn run(mut self) {
        info!(
            "RETRY | Starting retry loop at backoff level {}",
            self.backoff.level()
        );
        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }
            self.run_cycle().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!("RETRY | Retry loop stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
