// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Keyword placed in front of the token in the `Authorization` header.
pub const AUTHORIZATION_SCHEME: &str = "Splunk";

pub const DEFAULT_ENV: &str = "dummy";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_BUFFER: usize = 256;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_TIMER_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUEUE_PREFIX: &str = "splunk-forwarder";
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Hostname reported when neither `HEC_FORWARDER_HOSTNAME` nor `HOSTNAME` is set.
pub const UNKNOWN_HOSTNAME: &str = "unknownhost";

/// Upper bound on documents pulled from the durable queue per retry cycle.
pub const DEFAULT_RETRY_PAGE_SIZE: usize = 100;

/// Pause between retry loop cycles, and after an unhealthy status.
pub const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Backoff level bounds. Redelivery sleeps `0.15s * 2^level - 0.2s`.
pub const MIN_BACKOFF_LEVEL: u32 = 2;
pub const MAX_BACKOFF_LEVEL: u32 = 9;
pub const INITIAL_BACKOFF_LEVEL: u32 = 3;
pub const BACKOFF_SCALE: Duration = Duration::from_millis(150);
pub const BACKOFF_OFFSET: Duration = Duration::from_millis(200);
