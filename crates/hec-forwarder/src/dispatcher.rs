// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed worker pool draining one bounded queue of encoded documents.
//!
//! The queue is the backpressure point of the pipeline: [`Dispatcher::enqueue`]
//! waits while it is full, which in turn stalls the input reader. Workers share
//! the receiving end, so documents taken by different workers may reach the sink
//! in any order.

use crate::encoder::EncodedDocument;
use crate::queue::DurableQueue;
use crate::sink::Deliver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    queued: AtomicU64,
    lost: AtomicU64,
}

/// Snapshot of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub enqueued: u64,
    pub delivered: u64,
    /// Parked in the durable queue after a failed delivery
    pub queued: u64,
    /// Failed delivery and could not be parked either
    pub lost: u64,
}

impl DispatchStats {
    #[must_use]
    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    tx: Option<mpsc::Sender<EncodedDocument>>,
    workers: JoinSet<()>,
    queue: Arc<dyn DurableQueue>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Spawns `workers` tasks sharing a queue of `buffer` documents.
    ///
    /// Zero values are raised to one. Must be called inside a tokio runtime.
    pub fn start(
        workers: usize,
        buffer: usize,
        deliver: Arc<dyn Deliver>,
        queue: Arc<dyn DurableQueue>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(DispatchStats::default());

        let mut set = JoinSet::new();
        for id in 0..workers.max(1) {
            set.spawn(run_worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&deliver),
                Arc::clone(&queue),
                Arc::clone(&stats),
            ));
        }
        info!(
            "DISPATCH | Started {} workers with a queue of {} documents",
            workers.max(1),
            buffer.max(1)
        );

        Self {
            tx: Some(tx),
            workers: set,
            queue,
            stats,
        }
    }

    /// Hands `document` to the workers, waiting while the queue is full.
    ///
    /// After [`Self::stop`], or if every worker is gone, the document is parked
    /// in the durable queue instead.
    pub async fn enqueue(&self, document: EncodedDocument) {
        let document = match &self.tx {
            Some(tx) => match tx.send(document).await {
                Ok(()) => {
                    self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(mpsc::error::SendError(document)) => document,
            },
            None => document,
        };

        warn!("DISPATCH | Workers are not running, parking document");
        park(self.queue.as_ref(), &self.stats, &document).await;
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Closes the queue, lets the workers drain it and joins them.
    pub async fn stop(&mut self) -> DispatchCounts {
        drop(self.tx.take());
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("DISPATCH | Worker terminated abnormally: {e}");
            }
        }
        let counts = self.stats.snapshot();
        info!(
            "DISPATCH | Stopped: {} delivered, {} parked, {} lost",
            counts.delivered, counts.queued, counts.lost
        );
        counts
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<EncodedDocument>>>,
    deliver: Arc<dyn Deliver>,
    queue: Arc<dyn DurableQueue>,
    stats: Arc<DispatchStats>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(document) = next else {
            break;
        };

        match deliver.deliver(&document).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("DISPATCH | Worker {id} failed to deliver, parking document: {e}");
                park(queue.as_ref(), &stats, &document).await;
            }
        }
    }
    debug!("DISPATCH | Worker {id} exiting");
}

async fn park(queue: &dyn DurableQueue, stats: &DispatchStats, document: &EncodedDocument) {
    match queue.put(document.as_str()).await {
        Ok(key) => {
            stats.queued.fetch_add(1, Ordering::Relaxed);
            debug!("DISPATCH | Parked document as {key}");
        }
        Err(e) => {
            stats.lost.fetch_add(1, Ordering::Relaxed);
            error!(
                "DISPATCH | Failed to park {} bytes, document is lost: {e}",
                document.len()
            );
        }
    }
}
