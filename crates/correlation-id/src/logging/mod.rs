//! Log enrichment
//!
//! Filters read the flow-local store and attach the correlation ID (and
//! task lineage IDs) to log records. Two adapters carry them into the
//! `tracing` pipeline:
//!
//! - [`EnrichmentLayer`]: a subscriber layer turning every event into an
//!   enriched [`LogRecord`] and handing it to a [`RecordSink`]
//! - [`CorrelationFormat`]: wraps a fmt event formatter and prefixes each
//!   line with `[<correlation_id>] [<parent>-<current>]`
//!
//! [`init_tracing`] installs one of them as the global subscriber.

mod filter;
mod format;
mod layer;

pub use filter::{CorrelationIdFilter, TaskLineageFilter};
pub use format::CorrelationFormat;
pub use layer::{EnrichmentLayer, JsonLinesSink, MemorySink, RecordSink};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::field::{Field, Visit};
use tracing::{Event, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{CorrelationError, Result};
use crate::settings::{LogFormat, LoggingSettings};

/// A log record as seen by filters and sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Structured fields recorded on the event
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Values attached by filters; `None` means set but empty
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Option<String>>,
}

fn serialize_level<S: Serializer>(level: &Level, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(level)
}

impl LogRecord {
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Build a record from a `tracing` event
    pub fn from_event(event: &Event<'_>) -> Self {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        Self {
            fields: visitor.fields,
            ..Self::new(*metadata.level(), metadata.target(), visitor.message)
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Attach (or overwrite) a filter attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Option<String>) {
        self.attributes.insert(name.into(), value);
    }

    /// Value of an attribute, `None` if missing or empty
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    /// True once a filter has set the attribute, even to `None`
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.attribute(filter::CORRELATION_FIELD)
    }
}

/// Enriches a log record in place
///
/// Returning `false` drops the record.
pub trait LogFilter: Send + Sync {
    fn filter(&self, record: &mut LogRecord) -> bool;
}

impl<F: LogFilter + ?Sized> LogFilter for Arc<F> {
    fn filter(&self, record: &mut LogRecord) -> bool {
        (**self).filter(record)
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

/// Install the global `tracing` subscriber with correlation enrichment.
///
/// `RUST_LOG` wins over `settings.filter`. Text output goes through
/// [`CorrelationFormat`]; JSON output is written by [`EnrichmentLayer`] as
/// one object per line on stdout. Returns `Ok(false)` if a global subscriber
/// was already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<bool> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.filter.clone());
    let env_filter = EnvFilter::try_new(&directives)
        .map_err(|e| CorrelationError::Logging(format!("invalid filter '{}': {}", directives, e)))?;

    let correlation = CorrelationIdFilter::from_settings(settings);
    let lineage = TaskLineageFilter::from_settings(settings);

    let installed = match settings.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(CorrelationFormat::new(correlation, lineage)),
            )
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                EnrichmentLayer::new(JsonLinesSink::stdout())
                    .add_filter(correlation)
                    .add_filter(lineage),
            )
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_attributes() {
        let mut record = LogRecord::new(Level::INFO, "app", "Hello, world!");
        assert!(!record.has_attribute("correlation_id"));

        record.set_attribute("correlation_id", None);
        assert!(record.has_attribute("correlation_id"));
        assert_eq!(record.correlation_id(), None);

        record.set_attribute("correlation_id", Some("abc".to_string()));
        assert_eq!(record.correlation_id(), Some("abc"));
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut record =
            LogRecord::new(Level::WARN, "app", "Hello").with_field("user", "42");
        record.set_attribute("correlation_id", Some("abc".to_string()));
        record.set_attribute("celery_parent_id", None);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["message"], "Hello");
        assert_eq!(json["fields"]["user"], "42");
        assert_eq!(json["correlation_id"], "abc");
        assert!(json["celery_parent_id"].is_null());
    }

    #[test]
    fn test_init_tracing_rejects_bad_filter() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let settings = LoggingSettings {
            filter: "info,app=notalevel".to_string(),
            ..Default::default()
        };
        let err = init_tracing(&settings).unwrap_err();
        assert!(matches!(err, CorrelationError::Logging(_)));
    }
}
