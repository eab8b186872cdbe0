//! Reference service for correlation ID propagation
//!
//! An axum application wrapped in [`correlation_id::CorrelationIdLayer`]
//! whose endpoints hand work to an in-process task queue, so a single
//! request's correlation ID can be followed from the access log down to the
//! last subtask it spawned.

pub mod handler;
pub mod tasks;

pub use handler::{create_router, ApiError, AppState};
pub use tasks::{register_tasks, ChainCollector, ChainReceiver, ChainStep, CHAIN_TASK};
