// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting for the collector.
//!
//! Every line is prefixed with `OPCOLLECT` so collector diagnostics can be
//! told apart from the instrumented application's own logs:
//!
//! ```text
//! OPCOLLECT | LEVEL | [span_name{span_fields}:] message {event_fields}
//! OPCOLLECT | WARN | collector{trace=7}: exit called with no open frame
//! ```

use crate::config::CollectorConfig;
use std::fmt;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Event format producing the `OPCOLLECT` lines shown above.
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
        write!(writer, "OPCOLLECT | {} | ", event.metadata().level())?;

        // root span first, each as `name{fields}: ` or `name: `
        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            let extensions = span.extensions();
            match extensions
                .get::<FormattedFields<N>>()
                .filter(|fields| !fields.is_empty())
            {
                Some(fields) => write!(writer, "{}{{{}}}: ", span.name(), fields)?,
                None => write!(writer, "{}: ", span.name())?,
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the process-wide subscriber. `RUST_LOG` takes precedence over the
/// configured level. Fails if a global subscriber is already set.
pub fn init(config: &CollectorConfig) -> Result<(), SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let subscriber = tracing_subscriber::fmt()
        .event_format(Formatter)
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(Formatter)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_prefix_and_fields() {
        let output = capture(|| tracing::info!(count = 3, "flushed"));
        assert_eq!(output, "OPCOLLECT | INFO | flushed count=3\n");
    }

    #[test]
    fn test_span_context() {
        let output = capture(|| {
            let span = tracing::info_span!("collector", trace = 7);
            let _guard = span.enter();
            tracing::warn!("underflow");
        });
        assert_eq!(output, "OPCOLLECT | WARN | collector{trace=7}: underflow\n");
    }

    #[test]
    fn test_span_without_fields() {
        let output = capture(|| {
            let span = tracing::debug_span!("flush");
            let _guard = span.enter();
            tracing::error!("sink gone");
        });
        assert_eq!(output, "OPCOLLECT | ERROR | flush: sink gone\n");
    }
}
