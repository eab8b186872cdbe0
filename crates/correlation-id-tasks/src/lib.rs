//! Correlation IDs across background task hand-offs
//!
//! A task submitted while handling a request carries the request's
//! correlation ID in its headers, and the worker restores it before running
//! the task. Tasks submitted from other tasks additionally record lineage:
//! each execution gets a current ID, and the current ID of the submitting
//! task becomes the child's parent ID.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use correlation_id::{context, SharedTracker, TaskSettings};
//! use correlation_id_tasks::{TaskContext, TaskQueue, TaskRegistry, TaskSignals};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = TaskRegistry::new();
//! registry.register_fn("report", |ctx: TaskContext| async move {
//!     tracing::info!(task_id = %ctx.task_id, "building report");
//!     Ok(json!({ "correlation_id": context::correlation_id() }))
//! });
//!
//! let signals = TaskSignals::from_settings(&TaskSettings::default(), SharedTracker::noop());
//! let queue = TaskQueue::new(registry, signals);
//! queue.spawn_workers(2);
//!
//! let result = queue
//!     .submit("report", json!({}))?
//!     .wait(Duration::from_secs(10))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod hooks;
pub mod message;
pub mod queue;
pub mod registry;

pub use error::{QueueError, Result, TaskError};
pub use hooks::{CorrelationHooks, LineageHooks, PostrunGuard, TaskHooks, TaskSignals};
pub use message::{TaskHeaders, TaskMessage};
pub use queue::{TaskHandle, TaskQueue, Worker};
pub use registry::{TaskContext, TaskHandler, TaskRegistry};
