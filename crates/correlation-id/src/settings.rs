//! Settings for the correlation layer, log enrichment and task hooks
//!
//! Every knob is optional. Settings can be built from defaults, parsed from
//! TOML, or read from `CORRELATION_*` environment variables. Function-valued
//! options (generator, validators, transformer) are set on the layer builder
//! instead.
//!
//! ```toml
//! [http]
//! header_name = "X-Correlation-ID"
//! validate_uuid = false
//!
//! [logging]
//! uuid_length = 8
//! default_value = "-"
//!
//! [tasks]
//! use_internal_task_id = true
//! ```

use std::path::Path;

use http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::{CorrelationError, Result};

/// Default header carrying the correlation ID
pub const DEFAULT_HEADER_NAME: &str = "X-Request-ID";
/// Default task header key for the correlation ID
pub const DEFAULT_CORRELATION_ID_KEY: &str = "CORRELATION_ID";
/// Default task header key for the parent lineage ID
pub const DEFAULT_PARENT_ID_KEY: &str = "CELERY_PARENT_ID";

const ENV_PREFIX: &str = "CORRELATION_";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    pub http: HttpSettings,
    pub logging: LoggingSettings,
    pub tasks: TaskSettings,
}

/// Request boundary settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Header read from requests and written to responses
    pub header_name: String,

    /// Reject inbound values that are not v4 UUIDs
    pub validate_uuid: bool,

    /// Replace the inbound header with the resolved ID before the handler runs
    pub update_request_header: bool,

    /// List the header in `Access-Control-Expose-Headers`
    pub expose_header: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_HEADER_NAME.to_string(),
            validate_uuid: true,
            update_request_header: false,
            expose_header: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CorrelationError::settings(format!(
                "unknown log format '{}'",
                other
            ))),
        }
    }
}

/// Log enrichment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Truncate IDs to this many characters in log output
    pub uuid_length: Option<usize>,

    /// Value written when a slot is empty
    pub default_value: Option<String>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    pub format: LogFormat,

    pub correlation_field: String,
    pub parent_field: String,
    pub current_field: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            uuid_length: None,
            default_value: None,
            filter: "info".to_string(),
            format: LogFormat::Text,
            correlation_field: "correlation_id".to_string(),
            parent_field: "celery_parent_id".to_string(),
            current_field: "celery_current_id".to_string(),
        }
    }
}

/// Task hand-off settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Task header carrying the correlation ID
    pub correlation_id_key: String,

    /// Task header carrying the submitting task's lineage ID
    pub parent_id_key: String,

    /// Use the queue's own task ID as the lineage ID instead of generating one
    pub use_internal_task_id: bool,

    /// Workers spawned by the reference server
    pub workers: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            correlation_id_key: DEFAULT_CORRELATION_ID_KEY.to_string(),
            parent_id_key: DEFAULT_PARENT_ID_KEY.to_string(),
            use_internal_task_id: false,
            workers: 4,
        }
    }
}

impl CorrelationSettings {
    /// Load settings from `CORRELATION_*` environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let http = HttpSettings::default();
        let logging = LoggingSettings::default();
        let tasks = TaskSettings::default();

        Self {
            http: HttpSettings {
                header_name: var("HEADER_NAME").unwrap_or(http.header_name),
                validate_uuid: var("VALIDATE_UUID")
                    .map(|v| v.parse().unwrap_or(http.validate_uuid))
                    .unwrap_or(http.validate_uuid),
                update_request_header: var("UPDATE_REQUEST_HEADER")
                    .map(|v| v.parse().unwrap_or(http.update_request_header))
                    .unwrap_or(http.update_request_header),
                expose_header: var("EXPOSE_HEADER")
                    .map(|v| v.parse().unwrap_or(http.expose_header))
                    .unwrap_or(http.expose_header),
            },
            logging: LoggingSettings {
                uuid_length: var("LOG_UUID_LENGTH")
                    .and_then(|v| v.parse().ok())
                    .or(logging.uuid_length),
                default_value: var("LOG_DEFAULT_VALUE").or(logging.default_value),
                filter: var("LOG_FILTER").unwrap_or(logging.filter),
                format: var("LOG_FORMAT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(logging.format),
                correlation_field: var("LOG_CORRELATION_FIELD")
                    .unwrap_or(logging.correlation_field),
                parent_field: var("LOG_PARENT_FIELD").unwrap_or(logging.parent_field),
                current_field: var("LOG_CURRENT_FIELD").unwrap_or(logging.current_field),
            },
            tasks: TaskSettings {
                correlation_id_key: var("TASK_CORRELATION_ID_KEY")
                    .unwrap_or(tasks.correlation_id_key),
                parent_id_key: var("TASK_PARENT_ID_KEY").unwrap_or(tasks.parent_id_key),
                use_internal_task_id: var("TASK_USE_INTERNAL_ID")
                    .map(|v| v.parse().unwrap_or(tasks.use_internal_task_id))
                    .unwrap_or(tasks.use_internal_task_id),
                workers: var("TASK_WORKERS")
                    .map(|v| v.parse().unwrap_or(tasks.workers))
                    .unwrap_or(tasks.workers),
            },
        }
    }

    /// Parse settings from a TOML document and validate them
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let settings: Self = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a TOML settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render the settings as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CorrelationError::settings(e.to_string()))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.http.header_name()?;

        if self.logging.uuid_length == Some(0) {
            return Err(CorrelationError::config("logging.uuid_length must be > 0"));
        }
        if self.tasks.correlation_id_key.is_empty() || self.tasks.parent_id_key.is_empty() {
            return Err(CorrelationError::config("task header keys must not be empty"));
        }
        if self.tasks.correlation_id_key == self.tasks.parent_id_key {
            return Err(CorrelationError::config(
                "tasks.correlation_id_key and tasks.parent_id_key must differ",
            ));
        }

        Ok(())
    }
}

impl HttpSettings {
    /// Parsed form of `header_name`
    pub fn header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|e| CorrelationError::invalid_header_name(&self.header_name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = CorrelationSettings::default();
        assert_eq!(settings.http.header_name, "X-Request-ID");
        assert!(settings.http.validate_uuid);
        assert!(!settings.http.update_request_header);
        assert!(settings.http.expose_header);
        assert_eq!(settings.logging.uuid_length, None);
        assert_eq!(settings.logging.default_value, None);
        assert_eq!(settings.tasks.correlation_id_key, "CORRELATION_ID");
        assert_eq!(settings.tasks.parent_id_key, "CELERY_PARENT_ID");
        assert!(!settings.tasks.use_internal_task_id);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let settings = CorrelationSettings::from_toml_str(
            r#"
            [http]
            header_name = "X-Correlation-ID"
            validate_uuid = false

            [logging]
            uuid_length = 8
            default_value = "-"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.http.header_name, "X-Correlation-ID");
        assert!(!settings.http.validate_uuid);
        assert!(settings.http.expose_header);
        assert_eq!(settings.logging.uuid_length, Some(8));
        assert_eq!(settings.logging.default_value.as_deref(), Some("-"));
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.tasks, TaskSettings::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_header_name() {
        let err = CorrelationSettings::from_toml_str(
            r#"
            [http]
            header_name = "bad header"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CorrelationError::InvalidHeaderName { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_length_and_clashing_keys() {
        let mut settings = CorrelationSettings::default();
        settings.logging.uuid_length = Some(0);
        assert!(settings.validate().unwrap_err().is_config_error());

        let mut settings = CorrelationSettings::default();
        settings.tasks.parent_id_key = settings.tasks.correlation_id_key.clone();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CORRELATION_HEADER_NAME", "X-Trace"),
            ("CORRELATION_VALIDATE_UUID", "false"),
            ("CORRELATION_UPDATE_REQUEST_HEADER", "true"),
            ("CORRELATION_LOG_UUID_LENGTH", "12"),
            ("CORRELATION_LOG_FORMAT", "JSON"),
            ("CORRELATION_TASK_USE_INTERNAL_ID", "true"),
            ("CORRELATION_TASK_WORKERS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let settings =
            CorrelationSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.http.header_name, "X-Trace");
        assert!(!settings.http.validate_uuid);
        assert!(settings.http.update_request_header);
        assert!(settings.http.expose_header);
        assert_eq!(settings.logging.uuid_length, Some(12));
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(settings.tasks.use_internal_task_id);
        assert_eq!(settings.tasks.workers, 4);
    }

    #[test]
    fn test_from_file_and_round_trip() {
        let mut settings = CorrelationSettings::default();
        settings.logging.uuid_length = Some(16);
        settings.tasks.parent_id_key = "PARENT".to_string();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(settings.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = CorrelationSettings::from_file(file.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_from_file_missing() {
        let err = CorrelationSettings::from_file("/nonexistent/correlation.toml").unwrap_err();
        assert!(err.to_string().contains("I/O error"));
    }
}
