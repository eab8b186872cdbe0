//! Demo tasks run by the service's workers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use correlation_id::context;
use correlation_id_tasks::{TaskContext, TaskError, TaskRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Task that records its own flow and submits the next link of the chain
pub const CHAIN_TASK: &str = "chain";

#[derive(Debug, Deserialize)]
struct ChainPayload {
    chain_id: String,
    remaining: usize,
}

/// Flow IDs observed by one link of a task chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub task_id: String,
    pub correlation_id: Option<String>,
    pub parent_id: Option<String>,
    pub current_id: Option<String>,
}

type Senders = HashMap<String, mpsc::UnboundedSender<ChainStep>>;

/// Routes steps reported by chain tasks back to whoever opened the chain.
///
/// Links never wait on each other: each one reports its step and submits
/// the next, so a chain holds at most one worker at a time.
#[derive(Clone, Default)]
pub struct ChainCollector {
    chains: Arc<Mutex<Senders>>,
}

impl ChainCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Senders> {
        self.chains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new chain and return the receiving end for its steps
    pub fn open(&self) -> ChainReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().simple().to_string();
        self.lock().insert(id.clone(), sender);

        ChainReceiver {
            id,
            receiver,
            collector: self.clone(),
        }
    }

    /// Deliver a step; false when nobody is collecting that chain any more
    fn record(&self, chain_id: &str, step: ChainStep) -> bool {
        match self.lock().get(chain_id) {
            Some(sender) => sender.send(step).is_ok(),
            None => false,
        }
    }

    /// Number of chains still being collected
    pub fn open_chains(&self) -> usize {
        self.lock().len()
    }
}

impl std::fmt::Debug for ChainCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCollector")
            .field("open_chains", &self.open_chains())
            .finish()
    }
}

/// Receiving end of one chain; unregisters the chain when dropped
pub struct ChainReceiver {
    id: String,
    receiver: mpsc::UnboundedReceiver<ChainStep>,
    collector: ChainCollector,
}

impl ChainReceiver {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload for the first link of a chain of `depth` tasks
    pub fn payload(&self, depth: usize) -> Value {
        json!({ "chain_id": self.id, "remaining": depth })
    }

    /// Wait for `count` steps, or return what arrived when `timeout` expires
    pub async fn collect(&mut self, count: usize, timeout: Duration) -> Vec<ChainStep> {
        let mut steps = Vec::with_capacity(count);
        let _ = tokio::time::timeout(timeout, async {
            while steps.len() < count {
                match self.receiver.recv().await {
                    Some(step) => steps.push(step),
                    None => break,
                }
            }
        })
        .await;
        steps
    }
}

impl Drop for ChainReceiver {
    fn drop(&mut self) {
        self.collector.lock().remove(&self.id);
    }
}

async fn chain(ctx: TaskContext, collector: ChainCollector) -> Result<Value, TaskError> {
    let payload: ChainPayload = serde_json::from_value(ctx.payload.clone())?;
    let flow = context::snapshot();
    info!(remaining = payload.remaining, "Running chain step");

    let step = ChainStep {
        task_id: ctx.task_id.clone(),
        correlation_id: flow.correlation_id,
        parent_id: flow.task_parent_id,
        current_id: flow.task_current_id,
    };

    if !collector.record(&payload.chain_id, step.clone()) {
        warn!(chain_id = %payload.chain_id, "Chain is no longer collected, stopping");
        return Err(TaskError::failed(format!(
            "Chain {} is no longer collected",
            payload.chain_id
        )));
    }

    let next_task_id = if payload.remaining > 1 {
        let handle = ctx.submit(
            CHAIN_TASK,
            json!({ "chain_id": payload.chain_id, "remaining": payload.remaining - 1 }),
        )?;
        Some(handle.id().to_string())
    } else {
        None
    };

    Ok(json!({ "step": step, "next_task_id": next_task_id }))
}

/// Register the service's tasks
pub fn register_tasks(registry: &mut TaskRegistry, collector: ChainCollector) -> &mut TaskRegistry {
    registry.register_fn(CHAIN_TASK, move |ctx| chain(ctx, collector.clone()))
}
