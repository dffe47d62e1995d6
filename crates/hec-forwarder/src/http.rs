// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction shared by the sink and the health checker.

use crate::config::ForwarderConfig;
use crate::errors::ForwarderError;
use core::time::Duration;
use tracing::debug;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the client used for every outbound request.
///
/// The idle pool holds one connection per worker plus one for the retry loop.
pub fn get_client(config: &ForwarderConfig) -> Result<reqwest::Client, ForwarderError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(config.workers + 1)
        .tcp_keepalive(TCP_KEEPALIVE);

    if config.tls_skip_verify {
        debug!("HTTP | Certificate verification disabled for sink connections");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| ForwarderError::Client(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_client_default_config() {
        let config = ForwarderConfig::default();
        assert!(get_client(&config).is_ok());
    }

    #[test]
    fn test_get_client_skip_verify() {
        let config = ForwarderConfig {
            tls_skip_verify: true,
            ..Default::default()
        };
        assert!(get_client(&config).is_ok());
    }
}
