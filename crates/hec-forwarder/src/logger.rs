// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format for the forwarder process.
//!
//! ```text
//! HEC_FORWARDER | INFO | DISPATCH | Started 8 workers with a queue of 256 documents
//! HEC_FORWARDER | WARN | run{lines=40}: RETRY | Redelivery failed, backoff level now 4
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

const LOG_PREFIX: &str = "HEC_FORWARDER";

/// Dependencies whose own logging is switched off.
const SILENCED_TARGETS: [&str; 4] = ["h2", "hyper", "rustls", "reqwest"];

/// `EnvFilter` directive for `log_level` with noisy dependencies silenced.
#[must_use]
pub fn filter_directive(log_level: &str) -> String {
    let mut directive = String::new();
    for target in SILENCED_TARGETS {
        directive.push_str(target);
        directive.push_str("=off,");
    }
    directive.push_str(&log_level.to_lowercase());
    directive
}

/// Prefixes every event with `HEC_FORWARDER | LEVEL |`, then the span scope.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            filter_directive("DEBUG"),
            "h2=off,hyper=off,rustls=off,reqwest=off,debug"
        );
    }

    #[test]
    fn test_formatter_prefixes_level_and_spans() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(capture.clone())
            .with_ansi(false)
            .event_format(Formatter)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("DISPATCH | Started");
            let span = tracing::info_span!("run", lines = 3);
            let _guard = span.enter();
            tracing::warn!("RETRY | Redelivery failed");
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "HEC_FORWARDER | INFO | DISPATCH | Started");
        assert_eq!(
            lines[1],
            "HEC_FORWARDER | WARN | run{lines=3}: RETRY | Redelivery failed"
        );
    }
}
