//! Task lifecycle hooks
//!
//! Three points in a task's life carry IDs across the hand-off:
//!
//! - **publish**: runs in the submitting flow and copies IDs into the task
//!   headers
//! - **prerun**: runs in the worker's flow before the handler and restores
//!   IDs from the headers
//! - **postrun**: runs after the handler (also on failure or panic) and
//!   clears what prerun set, since a worker reuses one flow for many tasks
//!
//! [`CorrelationHooks`] carries the correlation ID. [`LineageHooks`] gives
//! each execution its own lineage ID and records the submitting task's
//! lineage ID as the parent.

use std::sync::Arc;

use correlation_id::context;
use correlation_id::resolver::{IdGenerator, UuidHexGenerator};
use correlation_id::settings::{TaskSettings, DEFAULT_CORRELATION_ID_KEY, DEFAULT_PARENT_ID_KEY};
use correlation_id::tracker::{detect_tracker, ErrorTracker, SharedTracker};
use tracing::{debug, warn};

use crate::message::{TaskHeaders, TaskMessage};

/// Callbacks invoked around task submission and execution
pub trait TaskHooks: Send + Sync {
    /// Called in the submitting flow before the task is enqueued
    fn before_publish(&self, _headers: &mut TaskHeaders) {}

    /// Called in the worker flow before the handler runs
    fn prerun(&self, _task: &TaskMessage) {}

    /// Called in the worker flow after the handler finished, however it finished
    fn postrun(&self) {}
}

/// Propagates the correlation ID from submitter to worker
pub struct CorrelationHooks {
    key: String,
    generator: Arc<dyn IdGenerator>,
    tracker: SharedTracker,
}

impl CorrelationHooks {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_CORRELATION_ID_KEY.to_string(),
            generator: Arc::new(UuidHexGenerator),
            tracker: detect_tracker(),
        }
    }

    pub fn from_settings(settings: &TaskSettings) -> Self {
        Self::new().with_key(&settings.correlation_id_key)
    }

    /// Task header carrying the correlation ID
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Generator used when a task arrives without a correlation ID
    pub fn with_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_shared_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_tracker(mut self, tracker: impl ErrorTracker + 'static) -> Self {
        self.tracker = SharedTracker::new(tracker);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for CorrelationHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHooks for CorrelationHooks {
    fn before_publish(&self, headers: &mut TaskHeaders) {
        if let Some(cid) = context::correlation_id() {
            headers.insert(self.key.clone(), cid);
        }
    }

    fn prerun(&self, task: &TaskMessage) {
        let id = match task.header(&self.key) {
            Some(id) => id.to_string(),
            None => {
                let generated = self.generator.generate();
                debug!(
                    task_id = %task.id,
                    correlation_id = %generated,
                    "Task has no correlation ID, generated a new one"
                );
                generated
            }
        };

        if let Err(e) = context::set_correlation_id(id.clone()) {
            warn!(task_id = %task.id, error = %e, "Could not restore correlation ID");
            return;
        }
        self.tracker.tag(&id);
    }

    fn postrun(&self) {
        // Outside a flow there is nothing to clear
        let _ = context::clear_correlation_id();
    }
}

/// Gives every task execution a lineage ID linked to its parent's
pub struct LineageHooks {
    key: String,
    generator: Arc<dyn IdGenerator>,
    use_internal_task_id: bool,
}

impl LineageHooks {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_PARENT_ID_KEY.to_string(),
            generator: Arc::new(UuidHexGenerator),
            use_internal_task_id: false,
        }
    }

    pub fn from_settings(settings: &TaskSettings) -> Self {
        Self::new()
            .with_key(&settings.parent_id_key)
            .use_internal_task_id(settings.use_internal_task_id)
    }

    /// Task header carrying the parent lineage ID
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_shared_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Use the queue's task ID as the lineage ID instead of a generated one
    pub fn use_internal_task_id(mut self, enabled: bool) -> Self {
        self.use_internal_task_id = enabled;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for LineageHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHooks for LineageHooks {
    fn before_publish(&self, headers: &mut TaskHeaders) {
        if let Some(current) = context::task_current_id() {
            headers.insert(self.key.clone(), current);
        }
    }

    fn prerun(&self, task: &TaskMessage) {
        if let Some(parent) = task.header(&self.key) {
            if let Err(e) = context::set_task_parent_id(parent) {
                warn!(task_id = %task.id, error = %e, "Could not restore parent task ID");
            }
        }

        let current = if self.use_internal_task_id {
            task.id.clone()
        } else {
            self.generator.generate()
        };
        if let Err(e) = context::set_task_current_id(current) {
            warn!(task_id = %task.id, error = %e, "Could not set current task ID");
        }
    }

    fn postrun(&self) {
        let _ = context::clear_task_lineage();
    }
}

/// Ordered registry of hooks, fanned out at each lifecycle point
#[derive(Clone, Default)]
pub struct TaskSignals {
    hooks: Vec<Arc<dyn TaskHooks>>,
}

impl TaskSignals {
    /// Registry with no hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation and lineage hooks configured from settings
    pub fn from_settings(settings: &TaskSettings, tracker: SharedTracker) -> Self {
        Self::from_settings_with_generator(settings, tracker, Arc::new(UuidHexGenerator))
    }

    /// Like [`from_settings`](Self::from_settings), generating missing IDs
    /// with `generator`, typically the HTTP layer's
    /// [`IdResolver::generator`](correlation_id::IdResolver::generator)
    pub fn from_settings_with_generator(
        settings: &TaskSettings,
        tracker: SharedTracker,
        generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self::new()
            .with(
                CorrelationHooks::from_settings(settings)
                    .with_tracker(tracker)
                    .with_shared_generator(Arc::clone(&generator)),
            )
            .with(LineageHooks::from_settings(settings).with_shared_generator(generator))
    }

    /// Add hooks; they run after those already registered
    pub fn with(mut self, hooks: impl TaskHooks + 'static) -> Self {
        self.hooks.push(Arc::new(hooks));
        self
    }

    pub fn register(&mut self, hooks: Arc<dyn TaskHooks>) {
        self.hooks.push(hooks);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn publish(&self, headers: &mut TaskHeaders) {
        for hooks in &self.hooks {
            hooks.before_publish(headers);
        }
    }

    pub fn prerun(&self, task: &TaskMessage) {
        for hooks in &self.hooks {
            hooks.prerun(task);
        }
    }

    pub fn postrun(&self) {
        for hooks in &self.hooks {
            hooks.postrun();
        }
    }

    /// Guard that runs [`postrun`](Self::postrun) when dropped
    pub fn postrun_guard(&self) -> PostrunGuard<'_> {
        PostrunGuard { signals: self }
    }
}

impl std::fmt::Debug for TaskSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSignals")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Runs postrun hooks on drop, including during unwinding
#[must_use = "postrun hooks run when the guard is dropped"]
pub struct PostrunGuard<'a> {
    signals: &'a TaskSignals,
}

impl Drop for PostrunGuard<'_> {
    fn drop(&mut self) {
        self.signals.postrun();
    }
}
