//! Flow-local storage for correlation and task lineage IDs.
//!
//! A *flow* is one logical execution: one HTTP request, or one worker's
//! lifetime of task executions. Each flow owns three slots:
//!
//! - the correlation ID
//! - the current task lineage ID
//! - the parent task lineage ID
//!
//! Slots live in a tokio task-local, so flows interleaved on the same
//! runtime (or the same thread) never see each other's values. Outside a
//! flow every read returns `None` and every write fails with
//! [`ContextError::NoActiveFlow`].
//!
//! ```rust
//! use correlation_id::context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! context::scope(async {
//!     context::set_correlation_id("abc123").unwrap();
//!     assert_eq!(context::correlation_id().as_deref(), Some("abc123"));
//! })
//! .await;
//!
//! assert!(context::correlation_id().is_none());
//! # }
//! ```

use std::cell::RefCell;
use std::future::Future;

use thiserror::Error;

tokio::task_local! {
    static FLOW: FlowSlots;
}

/// Error returned when writing to the store outside of a flow
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("no correlation flow is active on this task")]
    NoActiveFlow,
}

#[derive(Debug, Default)]
struct FlowSlots {
    correlation_id: RefCell<Option<String>>,
    task_parent_id: RefCell<Option<String>>,
    task_current_id: RefCell<Option<String>>,
}

impl From<FlowSnapshot> for FlowSlots {
    fn from(snapshot: FlowSnapshot) -> Self {
        Self {
            correlation_id: RefCell::new(snapshot.correlation_id),
            task_parent_id: RefCell::new(snapshot.task_parent_id),
            task_current_id: RefCell::new(snapshot.task_current_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Correlation,
    TaskParent,
    TaskCurrent,
}

impl Slot {
    fn cell(self, slots: &FlowSlots) -> &RefCell<Option<String>> {
        match self {
            Slot::Correlation => &slots.correlation_id,
            Slot::TaskParent => &slots.task_parent_id,
            Slot::TaskCurrent => &slots.task_current_id,
        }
    }
}

/// Point-in-time copy of every slot in the current flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub correlation_id: Option<String>,
    pub task_parent_id: Option<String>,
    pub task_current_id: Option<String>,
}

impl FlowSnapshot {
    /// Snapshot with only the correlation ID set
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Default::default()
        }
    }

    /// True when no slot holds a value
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none()
            && self.task_parent_id.is_none()
            && self.task_current_id.is_none()
    }
}

/// Run `fut` inside a fresh flow with every slot empty.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    FLOW.scope(FlowSlots::default(), fut).await
}

/// Run `fut` inside a fresh flow seeded from `initial`.
pub async fn scope_with<F: Future>(initial: FlowSnapshot, fut: F) -> F::Output {
    FLOW.scope(initial.into(), fut).await
}

/// Run `f` synchronously inside a fresh flow with every slot empty.
pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
    FLOW.sync_scope(FlowSlots::default(), f)
}

/// Run `f` synchronously inside a fresh flow seeded from `initial`.
pub fn sync_scope_with<R>(initial: FlowSnapshot, f: impl FnOnce() -> R) -> R {
    FLOW.sync_scope(initial.into(), f)
}

/// True when called from inside a flow
pub fn in_flow() -> bool {
    FLOW.try_with(|_| ()).is_ok()
}

fn read(slot: Slot) -> Option<String> {
    FLOW.try_with(|slots| slot.cell(slots).borrow().clone())
        .ok()
        .flatten()
}

fn write(slot: Slot, value: Option<String>) -> Result<(), ContextError> {
    FLOW.try_with(|slots| {
        *slot.cell(slots).borrow_mut() = value;
    })
    .map_err(|_| ContextError::NoActiveFlow)
}

/// Correlation ID of the current flow
pub fn correlation_id() -> Option<String> {
    read(Slot::Correlation)
}

/// Set the correlation ID of the current flow
pub fn set_correlation_id(id: impl Into<String>) -> Result<(), ContextError> {
    write(Slot::Correlation, Some(id.into()))
}

/// Empty the correlation slot of the current flow
pub fn clear_correlation_id() -> Result<(), ContextError> {
    write(Slot::Correlation, None)
}

/// Lineage ID of the task that submitted the current task
pub fn task_parent_id() -> Option<String> {
    read(Slot::TaskParent)
}

pub fn set_task_parent_id(id: impl Into<String>) -> Result<(), ContextError> {
    write(Slot::TaskParent, Some(id.into()))
}

/// Lineage ID of the task currently executing in this flow
pub fn task_current_id() -> Option<String> {
    read(Slot::TaskCurrent)
}

pub fn set_task_current_id(id: impl Into<String>) -> Result<(), ContextError> {
    write(Slot::TaskCurrent, Some(id.into()))
}

/// Empty both lineage slots of the current flow
pub fn clear_task_lineage() -> Result<(), ContextError> {
    write(Slot::TaskParent, None)?;
    write(Slot::TaskCurrent, None)
}

/// Empty every slot of the current flow
pub fn clear() -> Result<(), ContextError> {
    clear_correlation_id()?;
    clear_task_lineage()
}

/// Copy every slot of the current flow; empty outside a flow
pub fn snapshot() -> FlowSnapshot {
    FlowSnapshot {
        correlation_id: correlation_id(),
        task_parent_id: task_parent_id(),
        task_current_id: task_current_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_flow() {
        assert!(!in_flow());
        assert!(correlation_id().is_none());
        assert!(snapshot().is_empty());
        assert_eq!(set_correlation_id("x"), Err(ContextError::NoActiveFlow));
        assert_eq!(clear(), Err(ContextError::NoActiveFlow));
    }

    #[test]
    fn test_sync_scope_set_get_clear() {
        sync_scope(|| {
            assert!(in_flow());
            assert!(correlation_id().is_none());

            set_correlation_id("cid").unwrap();
            set_task_parent_id("parent").unwrap();
            set_task_current_id("current").unwrap();

            assert_eq!(
                snapshot(),
                FlowSnapshot {
                    correlation_id: Some("cid".to_string()),
                    task_parent_id: Some("parent".to_string()),
                    task_current_id: Some("current".to_string()),
                }
            );

            clear_task_lineage().unwrap();
            assert_eq!(correlation_id().as_deref(), Some("cid"));
            assert!(task_parent_id().is_none());
            assert!(task_current_id().is_none());

            clear().unwrap();
            assert!(snapshot().is_empty());
        });
    }

    #[tokio::test]
    async fn test_scope_ends_with_future() {
        scope_with(FlowSnapshot::correlated("request-1"), async {
            assert_eq!(correlation_id().as_deref(), Some("request-1"));
            tokio::task::yield_now().await;
            assert_eq!(correlation_id().as_deref(), Some("request-1"));
        })
        .await;

        assert!(correlation_id().is_none());
    }

    #[tokio::test]
    async fn test_nested_scopes_restore_outer_value() {
        scope_with(FlowSnapshot::correlated("outer"), async {
            scope_with(FlowSnapshot::correlated("inner"), async {
                assert_eq!(correlation_id().as_deref(), Some("inner"));
            })
            .await;
            assert_eq!(correlation_id().as_deref(), Some("outer"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_interleaved_flows_are_isolated() {
        let first = scope_with(FlowSnapshot::correlated("r1"), async {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(correlation_id());
                tokio::task::yield_now().await;
            }
            seen
        });
        let second = scope(async {
            set_correlation_id("r2").unwrap();
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(correlation_id());
                tokio::task::yield_now().await;
            }
            seen
        });

        let (first, second) = tokio::join!(first, second);
        assert!(first.iter().all(|id| id.as_deref() == Some("r1")));
        assert!(second.iter().all(|id| id.as_deref() == Some("r2")));
    }

    #[tokio::test]
    async fn test_spawned_task_does_not_inherit_flow() {
        scope_with(FlowSnapshot::correlated("parent-flow"), async {
            let seen = tokio::spawn(async { correlation_id() }).await.unwrap();
            assert!(seen.is_none());
        })
        .await;
    }
}
