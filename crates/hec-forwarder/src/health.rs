// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink health snapshots consumed by the retry loop.
//!
//! [`HealthCheck::status`] must be cheap and must not block: the HTTP checker
//! probes in its own task and only publishes the latest result.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of whether the sink accepts traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub healthy: bool,
    pub observed_at: DateTime<Utc>,
}

impl ServiceStatus {
    #[must_use]
    pub fn now(healthy: bool) -> Self {
        Self {
            healthy,
            observed_at: Utc::now(),
        }
    }
}

pub trait HealthCheck: Send + Sync {
    fn status(&self) -> ServiceStatus;
}

/// Used when no health endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

impl HealthCheck for AlwaysHealthy {
    fn status(&self) -> ServiceStatus {
        ServiceStatus::now(true)
    }
}

/// Manually controlled health flag.
#[derive(Debug, Default)]
pub struct StaticHealth {
    healthy: AtomicBool,
}

impl StaticHealth {
    #[must_use]
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}

impl HealthCheck for StaticHealth {
    fn status(&self) -> ServiceStatus {
        ServiceStatus::now(self.healthy.load(Ordering::Acquire))
    }
}

/// Probes a health endpoint periodically. `200 OK` means healthy.
///
/// Reports unhealthy until the first probe completes.
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    rx: watch::Receiver<ServiceStatus>,
}

impl HttpHealthChecker {
    /// Starts the probe task. It stops when `cancel_token` is cancelled.
    pub fn spawn(
        client: reqwest::Client,
        url: String,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(ServiceStatus::now(false));

        let handle = tokio::spawn(async move {
            info!("HEALTH | Probing {url} every {} ms", interval.as_millis());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("HEALTH | Received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let healthy = probe(&client, &url).await;
                        let previous = tx.borrow().healthy;
                        if previous != healthy {
                            info!("HEALTH | Sink is now {}", if healthy { "healthy" } else { "unhealthy" });
                        }
                        tx.send_replace(ServiceStatus::now(healthy));
                    }
                }
            }
        });

        (Self { rx }, handle)
    }
}

impl HealthCheck for HttpHealthChecker {
    fn status(&self) -> ServiceStatus {
        *self.rx.borrow()
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status() == reqwest::StatusCode::OK,
        Err(e) => {
            warn!("HEALTH | Health probe to {url} failed: {e}");
            false
        }
    }
}
