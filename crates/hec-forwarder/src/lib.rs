// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log forwarding pipeline for HTTP event collectors.
//!
//! Lines read from an input stream are grouped into batches, encoded as
//! space-joined JSON event objects and delivered by a fixed pool of workers.
//! Documents that fail delivery are parked in a durable queue and redriven by a
//! background retry loop once the sink reports healthy again.
//!
//! ```text
//!   stdin ──> Batcher ──> encoder ──> Dispatcher queue ──> workers ──> sink
//!                                                            │
//!                                                   failure  v
//!                                                      DurableQueue
//!                                                            │
//!                               RetryLoop (health gated) <───┘
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod encoder;
pub mod errors;
pub mod forwarder;
pub mod health;
pub mod http;
pub mod logger;
pub mod queue;
pub mod retry;
pub mod sink;

pub use config::ForwarderConfig;
pub use forwarder::{Forwarder, RunSummary};
