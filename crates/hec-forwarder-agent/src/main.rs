// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use hec_forwarder::{
    constants::DEFAULT_LOG_LEVEL,
    logger::{filter_directive, Formatter},
    Forwarder, ForwarderConfig,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = ForwarderConfig::from_env();

    let log_level = config
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("HEC_FORWARDER | ERROR | Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let forwarder = match Forwarder::new(config) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Failed to start forwarder: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = forwarder.run(tokio::io::stdin()).await;
    forwarder.shutdown().await;

    match result {
        Ok(summary) => {
            info!(
                "Shutting down after {} lines: {} documents delivered, {} parked, {} lost",
                summary.lines_read, summary.delivered, summary.queued, summary.lost
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Forwarder stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> Result<(), String> {
    let env_filter = EnvFilter::try_new(filter_directive(log_level))
        .map_err(|e| format!("could not parse log level {log_level}: {e}"))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
}
