// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the usage queue.
//!
//! Every line is prefixed with `USAGE_QUEUE` so the queue's output can be told
//! apart from the host application's:
//!
//! ```text
//! USAGE_QUEUE | LEVEL | [span{fields}: ]message fields
//! USAGE_QUEUE | WARN | Evicting 3 usage items older than 3600s
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::ConfigError;

pub const LOG_PREFIX: &str = "USAGE_QUEUE";

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
        write!(&mut writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // Fields are stored by the fmt layer on span creation; a span
                // recorded by another layer simply has none to show.
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

/// Filter directives for `log_level`, with noisy HTTP internals silenced.
pub fn filter_directives(log_level: &str) -> String {
    format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}")
}

/// Installs a global subscriber writing through [`Formatter`].
///
/// Fails if `log_level` is not a valid filter or a global subscriber is
/// already set.
pub fn init(log_level: &str) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_new(filter_directives(log_level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{info, info_span, warn};
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

    fn capture<F: FnOnce()>(f: F) -> String {
        let sink = Capture::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(sink.clone())
            .with_max_level(tracing::Level::TRACE)
            .event_format(Formatter)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_prefix_and_level() {
        let output = capture(|| info!(items = 3, "Flushed usage batch"));
        assert!(output.starts_with("USAGE_QUEUE | INFO | Flushed usage batch"));
        assert!(output.contains("items"));
        assert!(output.ends_with("3\n"));
    }

    #[test]
    fn test_span_context_is_included() {
        let output = capture(|| {
            let span = info_span!("flush", cycle = 7);
            let _guard = span.enter();
            warn!("Evicting stale items");
        });
        assert!(output.starts_with("USAGE_QUEUE | WARN | flush{"));
        assert!(output.contains("cycle"));
        assert!(output.ends_with("}: Evicting stale items\n"));
    }

    #[test]
    fn test_filter_directives() {
        assert_eq!(
            filter_directives("debug"),
            "h2=off,hyper=off,rustls=off,reqwest=off,debug"
        );
        assert!(EnvFilter::try_new(filter_directives("info")).is_ok());
    }
}
