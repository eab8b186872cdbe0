//! Task handlers and their registry

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{QueueError, TaskError};
use crate::message::{TaskHeaders, TaskMessage};
use crate::queue::{TaskHandle, TaskQueue};

/// What a handler sees of the task it is executing
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub name: String,
    pub headers: TaskHeaders,
    pub payload: Value,
    queue: TaskQueue,
}

impl TaskContext {
    pub(crate) fn new(message: &TaskMessage, queue: TaskQueue) -> Self {
        Self {
            task_id: message.id.clone(),
            name: message.name.clone(),
            headers: message.headers.clone(),
            payload: message.payload.clone(),
            queue,
        }
    }

    /// Queue this task came from
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Submit a subtask from inside the running task
    pub fn submit(&self, name: impl Into<String>, payload: Value) -> Result<TaskHandle, QueueError> {
        self.queue.submit(name, payload)
    }
}

/// Executes one kind of task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        (self.0)(ctx).await
    }
}

/// Handlers by task name
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one under the same name
    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.register(name, FnHandler(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
