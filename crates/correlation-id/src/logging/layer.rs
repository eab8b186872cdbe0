use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::{LogFilter, LogRecord};

/// Destination for enriched records
pub trait RecordSink: Send + Sync {
    fn write(&self, record: LogRecord);
}

/// Collects records in memory
///
/// Clones share the same buffer, so one handle can be installed in a layer
/// while another inspects what was captured.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<LogRecord> {
        self.lock().last().cloned()
    }

    /// Records whose message equals `message`
    pub fn find(&self, message: &str) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter(|record| record.message == message)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl RecordSink for MemorySink {
    fn write(&self, record: LogRecord) {
        self.lock().push(record);
    }
}

/// Writes each record as one JSON object per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn write(&self, record: LogRecord) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A failed log write has nowhere to be reported
        if serde_json::to_writer(&mut *writer, &record).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

/// Subscriber layer that enriches every event and forwards it to a sink
///
/// Filters run in insertion order on the emitting task, so they observe the
/// flow that produced the event. A filter returning `false` drops the record.
pub struct EnrichmentLayer {
    filters: Vec<Arc<dyn LogFilter>>,
    sink: Arc<dyn RecordSink>,
}

impl EnrichmentLayer {
    pub fn new(sink: impl RecordSink + 'static) -> Self {
        Self {
            filters: Vec::new(),
            sink: Arc::new(sink),
        }
    }

    pub fn add_filter(mut self, filter: impl LogFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Process a record outside of `tracing`
    pub fn emit(&self, mut record: LogRecord) {
        if self.filters.iter().all(|filter| filter.filter(&mut record)) {
            self.sink.write(record);
        }
    }
}

impl<S: Subscriber> Layer<S> for EnrichmentLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.emit(LogRecord::from_event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::logging::CorrelationIdFilter;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_layer_enriches_events() {
        let sink = MemorySink::new();
        let subscriber = tracing_subscriber::registry()
            .with(EnrichmentLayer::new(sink.clone()).add_filter(CorrelationIdFilter::new()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Hello, world");
            context::sync_scope(|| {
                context::set_correlation_id("abc").unwrap();
                tracing::info!(user = 42, "Hello, world again");
            });
        });

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "Hello, world");
        assert_eq!(records[0].correlation_id(), None);
        assert_eq!(records[1].message, "Hello, world again");
        assert_eq!(records[1].correlation_id(), Some("abc"));
        assert_eq!(records[1].fields.get("user").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_rejecting_filter_drops_record() {
        struct DropAll;
        impl LogFilter for DropAll {
            fn filter(&self, _record: &mut LogRecord) -> bool {
                false
            }
        }

        let sink = MemorySink::new();
        let layer = EnrichmentLayer::new(sink.clone()).add_filter(DropAll);
        layer.emit(LogRecord::new(tracing::Level::INFO, "app", "dropped"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.write(LogRecord::new(tracing::Level::INFO, "app", "one"));
        sink.write(LogRecord::new(tracing::Level::ERROR, "app", "two"));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "one");
        assert_eq!(lines[1]["level"], "ERROR");
    }
}
