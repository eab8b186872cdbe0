//! Correlation IDs for tower and axum services
//!
//! Every request gets one correlation ID, taken from an inbound header when
//! it is valid and generated otherwise. The ID lives in flow-local storage
//! while the request is handled, is attached to every log record emitted on
//! the way, tags the error tracker's scope, and is echoed back in the
//! response headers.
//!
//! ## Modules
//!
//! - [`context`]: flow-local storage for the correlation and task lineage IDs
//! - [`resolver`]: accept, reject or generate an ID from a header value
//! - [`middleware`]: the `tower` layer at the request boundary
//! - [`logging`]: log filters and `tracing` integration
//! - [`tracker`]: error-tracker tagging (Sentry behind the `sentry` feature)
//! - [`settings`]: TOML / environment configuration
//!
//! Task queue propagation lives in the `correlation-id-tasks` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use correlation_id::{context, CorrelationIdLayer};
//!
//! async fn handler() -> String {
//!     tracing::info!("handling request");
//!     context::correlation_id().unwrap_or_default()
//! }
//!
//! let app: Router = Router::new()
//!     .route("/", get(handler))
//!     .layer(CorrelationIdLayer::new());
//! ```

pub mod context;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod resolver;
pub mod settings;
pub mod tracker;

pub use context::{ContextError, FlowSnapshot};
pub use error::{CorrelationError, Result};
pub use logging::{
    init_tracing, CorrelationFormat, CorrelationIdFilter, EnrichmentLayer, JsonLinesSink, LogFilter,
    LogRecord, MemorySink, RecordSink, TaskLineageFilter,
};
pub use middleware::{CorrelationId, CorrelationIdLayer, CorrelationIdLayerBuilder, CorrelationIdService};
pub use resolver::{
    is_valid_uuid4, IdGenerator, IdResolver, IdSource, IdTransformer, IdValidator, Resolution,
    Uuid4Validator, UuidHexGenerator,
};
pub use settings::{
    CorrelationSettings, HttpSettings, LogFormat, LoggingSettings, TaskSettings,
    DEFAULT_CORRELATION_ID_KEY, DEFAULT_HEADER_NAME, DEFAULT_PARENT_ID_KEY,
};
pub use tracker::{bind_flow_hub, detect_tracker, ErrorTracker, NoopTracker, SharedTracker};

#[cfg(feature = "sentry")]
pub use tracker::SentryTracker;
