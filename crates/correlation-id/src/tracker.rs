//! Error-tracker bridge
//!
//! Tags the monitoring client's current scope with the correlation ID so
//! captured events can be matched to log lines. Without a client (or
//! without the `sentry` feature) tagging is a no-op.
//!
//! Sentry scopes belong to a hub, and the current hub is per thread unless a
//! future is bound to one. Run each flow under [`bind_flow_hub`] so a tag set
//! for one request or task does not outlive it on a shared worker thread.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Tag key used on the error tracker's scope
pub const TRANSACTION_ID_TAG: &str = "transaction_id";

/// Attaches the current correlation ID to an external error tracker
#[cfg_attr(test, mockall::automock)]
pub trait ErrorTracker: Send + Sync {
    fn tag(&self, correlation_id: &str);
}

/// Tracker used when no monitoring client is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl ErrorTracker for NoopTracker {
    fn tag(&self, _correlation_id: &str) {}
}

impl<T: ErrorTracker + ?Sized> ErrorTracker for Arc<T> {
    fn tag(&self, correlation_id: &str) {
        (**self).tag(correlation_id)
    }
}

/// Sets `transaction_id` on the current Sentry scope.
///
/// The tag lands on whichever hub is current, so callers wrap the flow in
/// [`bind_flow_hub`]; the interceptor and the task workers both do.
#[cfg(feature = "sentry")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SentryTracker;

#[cfg(feature = "sentry")]
impl ErrorTracker for SentryTracker {
    fn tag(&self, correlation_id: &str) {
        sentry::configure_scope(|scope| {
            scope.set_tag(TRANSACTION_ID_TAG, correlation_id);
        });
    }
}

/// Shared, type-erased tracker handle
#[derive(Clone)]
pub struct SharedTracker(Arc<dyn ErrorTracker>);

impl SharedTracker {
    pub fn new(tracker: impl ErrorTracker + 'static) -> Self {
        Self(Arc::new(tracker))
    }

    pub fn noop() -> Self {
        Self::new(NoopTracker)
    }
}

impl ErrorTracker for SharedTracker {
    fn tag(&self, correlation_id: &str) {
        self.0.tag(correlation_id)
    }
}

impl Default for SharedTracker {
    fn default() -> Self {
        detect_tracker()
    }
}

impl fmt::Debug for SharedTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedTracker").finish()
    }
}

/// Pick a tracker once, based on what is available at startup.
///
/// Returns the Sentry tracker when the `sentry` feature is compiled in and a
/// client is bound to the current hub; otherwise the no-op tracker.
pub fn detect_tracker() -> SharedTracker {
    #[cfg(feature = "sentry")]
    {
        if sentry::Hub::current().client().is_some() {
            tracing::debug!("Sentry client detected, tagging events with correlation IDs");
            return SharedTracker::new(SentryTracker);
        }
    }

    SharedTracker::noop()
}

/// Run `future` on a fresh hub forked from the current one.
///
/// Scope changes made inside (such as the `transaction_id` tag) stay with
/// the future and vanish when it completes.
#[cfg(feature = "sentry")]
pub fn bind_flow_hub<F: Future>(future: F) -> impl Future<Output = F::Output> {
    use sentry::SentryFutureExt;

    let hub = Arc::new(sentry::Hub::new_from_top(sentry::Hub::current()));
    future.bind_hub(hub)
}

/// Run `future` unchanged; without the `sentry` feature there is no hub to fork
#[cfg(not(feature = "sentry"))]
pub fn bind_flow_hub<F: Future>(future: F) -> impl Future<Output = F::Output> {
    future
}
