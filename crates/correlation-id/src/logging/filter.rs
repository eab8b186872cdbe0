use crate::context;
use crate::settings::LoggingSettings;

use super::{LogFilter, LogRecord};

pub(crate) const CORRELATION_FIELD: &str = "correlation_id";
pub(crate) const PARENT_FIELD: &str = "celery_parent_id";
pub(crate) const CURRENT_FIELD: &str = "celery_current_id";

/// First `uuid_length` characters of `value`, or the default when absent
fn render(value: Option<String>, uuid_length: Option<usize>, default_value: &Option<String>) -> Option<String> {
    match value {
        Some(id) => Some(match uuid_length {
            Some(length) => id.chars().take(length).collect(),
            None => id,
        }),
        None => default_value.clone(),
    }
}

/// Attaches the flow's correlation ID as `correlation_id`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationIdFilter {
    pub uuid_length: Option<usize>,
    pub default_value: Option<String>,
    field: Option<String>,
}

impl CorrelationIdFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            uuid_length: settings.uuid_length,
            default_value: settings.default_value.clone(),
            field: Some(settings.correlation_field.clone()),
        }
    }

    pub fn with_uuid_length(mut self, uuid_length: usize) -> Self {
        self.uuid_length = Some(uuid_length);
        self
    }

    pub fn with_default_value(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Rename the attached field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(CORRELATION_FIELD)
    }
}

impl LogFilter for CorrelationIdFilter {
    fn filter(&self, record: &mut LogRecord) -> bool {
        let value = render(context::correlation_id(), self.uuid_length, &self.default_value);
        record.set_attribute(self.field(), value);
        true
    }
}

/// Attaches the flow's task lineage as `celery_parent_id` and `celery_current_id`
///
/// The parent ID is the lineage ID of whichever task submitted the running
/// task; it is empty for tasks submitted from a request or with no lineage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLineageFilter {
    pub uuid_length: Option<usize>,
    pub default_value: Option<String>,
    parent_field: Option<String>,
    current_field: Option<String>,
}

impl TaskLineageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            uuid_length: settings.uuid_length,
            default_value: settings.default_value.clone(),
            parent_field: Some(settings.parent_field.clone()),
            current_field: Some(settings.current_field.clone()),
        }
    }

    pub fn with_uuid_length(mut self, uuid_length: usize) -> Self {
        self.uuid_length = Some(uuid_length);
        self
    }

    pub fn with_default_value(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Rename the attached fields
    pub fn with_fields(mut self, parent: impl Into<String>, current: impl Into<String>) -> Self {
        self.parent_field = Some(parent.into());
        self.current_field = Some(current.into());
        self
    }

    pub fn parent_field(&self) -> &str {
        self.parent_field.as_deref().unwrap_or(PARENT_FIELD)
    }

    pub fn current_field(&self) -> &str {
        self.current_field.as_deref().unwrap_or(CURRENT_FIELD)
    }
}

impl LogFilter for TaskLineageFilter {
    fn filter(&self, record: &mut LogRecord) -> bool {
        let parent = render(context::task_parent_id(), self.uuid_length, &self.default_value);
        let current = render(context::task_current_id(), self.uuid_length, &self.default_value);
        record.set_attribute(self.parent_field(), parent);
        record.set_attribute(self.current_field(), current);
        true
    }
}
