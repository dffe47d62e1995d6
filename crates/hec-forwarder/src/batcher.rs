// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Groups input lines into batches and flushes them to the dispatcher.
//!
//! Every reader iteration first checks the batch timer, then the batch size, and
//! only then reads the next line. A flush encodes the batch, hands it to the
//! dispatcher and starts a fresh batch. At end of input whatever is buffered is
//! flushed one last time.

use crate::dispatcher::Dispatcher;
use crate::encoder;
use crate::errors::ForwarderError;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, error, info};

/// Ordered lines waiting to be flushed. Never holds more than `capacity`.
#[derive(Debug)]
pub struct Batch {
    lines: Vec<String>,
    capacity: usize,
}

impl Batch {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `line`, handing it back if the batch is already full.
    pub fn push(&mut self, line: String) -> Result<(), String> {
        if self.is_full() {
            return Err(line);
        }
        self.lines.push(line);
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Removes the buffered lines, leaving an empty batch of the same capacity.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::replace(&mut self.lines, Vec::with_capacity(self.capacity))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub lines: u64,
    /// Empty lines dropped before batching
    pub skipped: u64,
    pub documents: u64,
}

pub struct Batcher {
    batch: Batch,
    timer: Option<Duration>,
    counts: BatchCounts,
}

impl Batcher {
    /// `timer` of `None` disables time-based flushing.
    #[must_use]
    pub fn new(batch_size: usize, timer: Option<Duration>) -> Self {
        Self {
            batch: Batch::new(batch_size),
            timer: timer.filter(|t| !t.is_zero()),
            counts: BatchCounts::default(),
        }
    }

    /// Reads `reader` to the end, flushing batches into `dispatcher`.
    ///
    /// Returns once the final batch has been handed over. Only read errors other
    /// than end of input are returned.
    pub async fn run<R>(
        mut self,
        reader: R,
        dispatcher: &Dispatcher,
    ) -> Result<BatchCounts, ForwarderError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new()));
        let mut deadline = self.next_deadline();

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("BATCHER | Batch timer elapsed with {} lines", self.batch.len());
                self.flush(dispatcher).await;
                deadline = self.next_deadline();
            }
            if self.batch.is_full() {
                self.flush(dispatcher).await;
                deadline = self.next_deadline();
            }

            let next = match deadline {
                Some(at) if !self.batch.is_empty() => {
                    tokio::select! {
                        biased;
                        item = lines.next() => Some(item),
                        () = sleep_until(at) => None,
                    }
                }
                _ => Some(lines.next().await),
            };

            match next {
                // Timer woke us, the next iteration flushes.
                None => continue,
                Some(None) => break,
                Some(Some(Ok(chunk))) => self.accept(&chunk),
                Some(Some(Err(e))) => return Err(ForwarderError::Input(into_io_error(e))),
            }
        }

        self.flush(dispatcher).await;
        info!(
            "BATCHER | End of input: {} lines in {} documents, {} empty lines skipped",
            self.counts.lines, self.counts.documents, self.counts.skipped
        );
        Ok(self.counts)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| Instant::now() + timer)
    }

    fn accept(&mut self, chunk: &Bytes) {
        let text = String::from_utf8_lossy(chunk);
        let line = text.strip_suffix('\r').unwrap_or(&text);
        if line.is_empty() {
            self.counts.skipped += 1;
            return;
        }

        self.counts.lines += 1;
        // The size check at the top of each iteration keeps room for one line.
        if let Err(line) = self.batch.push(line.to_owned()) {
            error!(
                "BATCHER | Batch of {} lines is full, dropping a {} byte line",
                self.batch.len(),
                line.len()
            );
        }
    }

    async fn flush(&mut self, dispatcher: &Dispatcher) {
        if self.batch.is_empty() {
            return;
        }
        let lines = self.batch.take();
        let document = encoder::encode(&lines);
        debug!(
            "BATCHER | Flushing {} lines as {} bytes",
            lines.len(),
            document.len()
        );
        dispatcher.enqueue(document).await;
        self.counts.documents += 1;
    }
}

fn into_io_error(e: AnyDelimiterCodecError) -> io::Error {
    match e {
        AnyDelimiterCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
