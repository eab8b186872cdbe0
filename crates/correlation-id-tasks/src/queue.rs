//! In-process task queue and workers
//!
//! [`TaskQueue::submit`] runs publish hooks in the caller's flow and
//! enqueues the task. Each [`Worker`] enters one flow for its whole life and
//! runs prerun hooks, the handler and postrun hooks for every task it picks
//! up. Several workers can share one queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use correlation_id::{context, tracker};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{QueueError, Result, TaskError};
use crate::hooks::TaskSignals;
use crate::message::TaskMessage;
use crate::registry::{TaskContext, TaskRegistry};

type Reply = std::result::Result<Value, TaskError>;

struct Envelope {
    message: TaskMessage,
    reply: oneshot::Sender<Reply>,
}

struct QueueInner {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    shutdown: watch::Sender<bool>,
    registry: TaskRegistry,
    signals: TaskSignals,
}

/// Handle to an in-process task queue; clones share the same queue
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(registry: TaskRegistry, signals: TaskSignals) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: Mutex::new(receiver),
                shutdown,
                registry,
                signals,
            }),
        }
    }

    pub fn signals(&self) -> &TaskSignals {
        &self.inner.signals
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Enqueue a task.
    ///
    /// Publish hooks run here, in the caller's flow, so the task headers
    /// pick up the caller's correlation and lineage IDs.
    pub fn submit(&self, name: impl Into<String>, payload: Value) -> Result<TaskHandle> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let mut message = TaskMessage::new(name, payload);
        self.inner.signals.publish(&mut message.headers);

        debug!(
            task_id = %message.id,
            task = %message.name,
            headers = ?message.headers,
            "Publishing task"
        );

        let (reply, receiver) = oneshot::channel();
        let handle = TaskHandle {
            id: message.id.clone(),
            name: message.name.clone(),
            receiver,
        };

        self.inner
            .sender
            .send(Envelope { message, reply })
            .map_err(|_| QueueError::Closed)?;

        Ok(handle)
    }

    /// Spawn `count` workers on the current runtime
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|index| {
                let worker = Worker::new(self.clone(), format!("worker-{}", index));
                tokio::spawn(worker.run())
            })
            .collect()
    }

    /// Stop accepting tasks and let idle workers exit
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("registry", &self.inner.registry)
            .field("signals", &self.inner.signals)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Pending result of a submitted task
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    name: String,
    receiver: oneshot::Receiver<Reply>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the task's result, giving up after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Err(_) => Err(QueueError::Timeout(timeout)),
            Ok(Err(_)) => Err(QueueError::Canceled),
            Ok(Ok(reply)) => reply.map_err(QueueError::Task),
        }
    }

    /// Wait for the task's result without a deadline
    pub async fn join(self) -> Result<Value> {
        match self.receiver.await {
            Err(_) => Err(QueueError::Canceled),
            Ok(reply) => reply.map_err(QueueError::Task),
        }
    }
}

/// Executes tasks from a queue, one at a time
pub struct Worker {
    queue: TaskQueue,
    name: String,
}

impl Worker {
    pub fn new(queue: TaskQueue, name: impl Into<String>) -> Self {
        Self {
            queue,
            name: name.into(),
        }
    }

    /// Process tasks until the queue is shut down.
    ///
    /// The worker's flow spans every task it runs; postrun hooks are what
    /// keep one task's IDs from leaking into the next.
    pub async fn run(self) {
        let span = info_span!("worker", worker = %self.name);
        context::scope(
            async move {
                let mut shutdown = self.queue.inner.shutdown.subscribe();
                info!("Worker started");

                while let Some(envelope) = self.next(&mut shutdown).await {
                    self.execute(envelope).await;
                }

                info!("Worker stopped");
            }
            .instrument(span),
        )
        .await
    }

    async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Envelope> {
        if *shutdown.borrow() {
            return None;
        }

        tokio::select! {
            _ = shutdown.changed() => None,
            envelope = async { self.queue.inner.receiver.lock().await.recv().await } => envelope,
        }
    }

    async fn execute(&self, envelope: Envelope) {
        let Envelope { message, reply } = envelope;

        // A fresh error-tracker hub per task, so scope tags end with the task
        let result = tracker::bind_flow_hub(self.run_task(&message)).await;

        // The submitter may have stopped waiting
        let _ = reply.send(result);
    }

    async fn run_task(&self, message: &TaskMessage) -> Reply {
        let signals = &self.queue.inner.signals;
        let _postrun = signals.postrun_guard();
        signals.prerun(message);
        info!(task_id = %message.id, task = %message.name, "Task started");

        let result = match self.queue.inner.registry.get(&message.name) {
            None => Err(TaskError::UnknownTask(message.name.clone())),
            Some(handler) => {
                let ctx = TaskContext::new(message, self.queue.clone());
                AssertUnwindSafe(handler.handle(ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(&*panic))))
            }
        };

        match &result {
            Ok(_) => info!(task_id = %message.id, task = %message.name, "Task succeeded"),
            Err(e) => warn!(task_id = %message.id, task = %message.name, error = %e, "Task failed"),
        }
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
