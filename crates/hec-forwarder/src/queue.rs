// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable queue for documents that failed delivery.
//!
//! Documents are stored as individual objects under
//! `<prefix>/<timestamp nanos>_<uuid>`, so the key order of a listing is also the
//! order in which documents were parked. Retrieval deletes what it returns
//! before the caller redelivers it, so a crash after retrieval loses those
//! documents instead of redelivering them twice.

use crate::config::{ForwarderConfig, QueueLocation};
use crate::errors::QueueError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key-addressed store holding documents until they can be redelivered.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Stores `body` under a freshly generated key and returns that key.
    async fn put(&self, body: &str) -> Result<String, QueueError>;

    /// Returns up to `limit` stored bodies and removes them from the store.
    ///
    /// Removal is per item and best effort: an item that cannot be fetched or
    /// deleted is skipped and stays for a later call.
    async fn list_and_delete(&self, limit: usize) -> Result<Vec<String>, QueueError>;
}

/// [`DurableQueue`] backed by any [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreQueue {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl ObjectStoreQueue {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: Path::from(prefix.trim_matches('/')),
        }
    }

    /// Process-local queue. Used when no durable location is configured.
    #[must_use]
    pub fn in_memory(prefix: &str) -> Self {
        Self::new(Arc::new(InMemory::new()), prefix)
    }

    /// Queue stored under a local directory, created if missing.
    pub fn local(dir: &std::path::Path, prefix: &str) -> Result<Self, QueueError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            QueueError::Setup(format!("cannot create queue directory {}: {e}", dir.display()))
        })?;
        let store = LocalFileSystem::new_with_prefix(dir)?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// Queue stored in an S3 bucket. Credentials come from the AWS environment.
    pub fn s3(bucket: &str, region: &str, prefix: &str) -> Result<Self, QueueError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    pub fn from_config(config: &ForwarderConfig) -> Result<Self, QueueError> {
        let queue = match &config.queue {
            QueueLocation::Memory => {
                warn!("QUEUE | No durable location configured, failed documents are kept in memory only");
                Self::in_memory(&config.queue_prefix)
            }
            QueueLocation::Local(dir) => Self::local(dir, &config.queue_prefix)?,
            QueueLocation::S3 { bucket, region } => {
                Self::s3(bucket, region, &config.queue_prefix)?
            }
        };
        info!(
            "QUEUE | Parking failed documents in {} under '{}'",
            queue.store, queue.prefix
        );
        Ok(queue)
    }

    fn next_key(&self) -> Path {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.prefix
            .child(format!("{nanos:020}_{}", Uuid::new_v4()))
    }

    fn list_prefix(&self) -> Option<&Path> {
        (!self.prefix.as_ref().is_empty()).then_some(&self.prefix)
    }
}

#[async_trait]
impl DurableQueue for ObjectStoreQueue {
    async fn put(&self, body: &str) -> Result<String, QueueError> {
        let key = self.next_key();
        let payload = PutPayload::from(Bytes::from(body.to_owned()));
        self.store.put(&key, payload).await?;
        debug!("QUEUE | Stored {} bytes as {key}", body.len());
        Ok(key.to_string())
    }

    async fn list_and_delete(&self, limit: usize) -> Result<Vec<String>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Listing order is backend specific, so the page is cut after sorting.
        let mut locations: Vec<Path> = self
            .store
            .list(self.list_prefix())
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        locations.sort();
        locations.truncate(limit);

        let mut bodies = Vec::with_capacity(locations.len());
        for location in locations {
            let bytes = match self.store.get(&location).await {
                Ok(result) => match result.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("QUEUE | Failed to read {location}, leaving it for later: {e}");
                        continue;
                    }
                },
                Err(e) => {
                    warn!("QUEUE | Failed to fetch {location}, leaving it for later: {e}");
                    continue;
                }
            };

            if let Err(e) = self.store.delete(&location).await {
                warn!("QUEUE | Failed to delete {location}, leaving it for later: {e}");
                continue;
            }

            bodies.push(String::from_utf8_lossy(&bytes).into_owned());
        }

        Ok(bodies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_put_then_list_and_delete() {
        let queue = ObjectStoreQueue::in_memory("splunk-forwarder");

        let key = queue.put("document one").await.expect("put should succeed");
        assert!(key.starts_with("splunk-forwarder/"));
        queue.put("document two").await.expect("put should succeed");

        let bodies = queue.list_and_delete(10).await.expect("list should succeed");
        assert_eq!(bodies, vec!["document one", "document two"]);

        let bodies = queue.list_and_delete(10).await.expect("list should succeed");
        assert!(bodies.is_empty(), "entries must not be observable twice");
    }

    #[tokio::test]
    async fn test_list_and_delete_respects_limit() {
        let queue = ObjectStoreQueue::in_memory("prefix");
        for i in 0..5 {
            queue.put(&format!("doc {i}")).await.expect("put should succeed");
        }

        let first = queue.list_and_delete(3).await.expect("list should succeed");
        assert_eq!(first.len(), 3);
        let rest = queue.list_and_delete(3).await.expect("list should succeed");
        assert_eq!(rest.len(), 2);
        let none = queue.list_and_delete(0).await.expect("list should succeed");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_prefixes_are_isolated() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let prod = ObjectStoreQueue::new(Arc::clone(&store), "prod");
        let staging = ObjectStoreQueue::new(store, "staging");

        prod.put("prod doc").await.expect("put should succeed");
        staging.put("staging doc").await.expect("put should succeed");

        assert_eq!(
            prod.list_and_delete(10).await.expect("list should succeed"),
            vec!["prod doc"]
        );
        assert_eq!(
            staging.list_and_delete(10).await.expect("list should succeed"),
            vec!["staging doc"]
        );
    }

    #[tokio::test]
    async fn test_keys_are_unique() {
        let queue = ObjectStoreQueue::in_memory("p");
        let a = queue.put("same").await.expect("put should succeed");
        let b = queue.put("same").await.expect("put should succeed");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_local_directory_queue() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let queue = ObjectStoreQueue::local(&dir.path().join("spool"), "splunk-forwarder")
            .expect("local queue should build");

        queue.put(" {\"event\":\"x\"}").await.expect("put should succeed");
        let bodies = queue.list_and_delete(10).await.expect("list should succeed");
        assert_eq!(bodies, vec![" {\"event\":\"x\"}"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_memory_queue_from_config_warns() {
        let config = ForwarderConfig {
            queue_prefix: "from-config".to_string(),
            ..ForwarderConfig::default()
        };
        let queue = ObjectStoreQueue::from_config(&config).expect("memory queue should build");

        assert!(logs_contain("No durable location configured"));
        let key = queue.put("doc").await.expect("put should succeed");
        assert!(key.starts_with("from-config/"));
    }

    #[tokio::test]
    async fn test_local_queue_returns_oldest_page_first() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let queue = ObjectStoreQueue::local(dir.path(), "splunk-forwarder")
            .expect("local queue should build");
        for i in 0..40 {
            queue
                .put(&format!("doc {i:02}"))
                .await
                .expect("put should succeed");
            // Keys carry a nanosecond timestamp, keep them strictly increasing.
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let page = queue.list_and_delete(5).await.expect("list should succeed");
        let expected: Vec<String> = (0..5).map(|i| format!("doc {i:02}")).collect();
        assert_eq!(page, expected);

        let rest = queue.list_and_delete(100).await.expect("list should succeed");
        assert_eq!(rest.len(), 35);
        assert_eq!(rest[0], "doc 05");
    }
}
