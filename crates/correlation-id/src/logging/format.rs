use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{Format, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use super::{CorrelationIdFilter, LogFilter, LogRecord, TaskLineageFilter};

const MISSING: &str = "-";

/// Event formatter that prefixes lines with correlation and lineage IDs
///
/// Output looks like
/// `[3f2a9c1e] [-7d41b0aa] 2024-05-01T12:00:00Z  INFO app: Hello`, with `-`
/// standing in for empty slots unless the filters carry a default value.
#[derive(Debug, Clone)]
pub struct CorrelationFormat<F = Format> {
    inner: F,
    correlation: CorrelationIdFilter,
    lineage: TaskLineageFilter,
}

impl CorrelationFormat {
    /// Wrap the default fmt formatter
    pub fn new(correlation: CorrelationIdFilter, lineage: TaskLineageFilter) -> Self {
        Self::wrap(Format::default(), correlation, lineage)
    }
}

impl Default for CorrelationFormat {
    fn default() -> Self {
        Self::new(CorrelationIdFilter::default(), TaskLineageFilter::default())
    }
}

impl<F> CorrelationFormat<F> {
    /// Wrap an arbitrary event formatter
    pub fn wrap(inner: F, correlation: CorrelationIdFilter, lineage: TaskLineageFilter) -> Self {
        Self {
            inner,
            correlation,
            lineage,
        }
    }

    /// Prefix for the current flow
    pub fn prefix(&self) -> String {
        let mut record = LogRecord::new(Level::TRACE, "", "");
        self.correlation.filter(&mut record);
        self.lineage.filter(&mut record);

        format!(
            "[{}] [{}-{}]",
            record.attribute(self.correlation.field()).unwrap_or(MISSING),
            record.attribute(self.lineage.parent_field()).unwrap_or(MISSING),
            record.attribute(self.lineage.current_field()).unwrap_or(MISSING),
        )
    }
}

impl<S, N, F> FormatEvent<S, N> for CorrelationFormat<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{} ", self.prefix())?;
        self.inner.format_event(ctx, writer, event)
    }
}
