//! HTTP handlers for the correlation ID service

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use correlation_id::{context, CorrelationId, CorrelationIdLayer};
use correlation_id_tasks::{QueueError, TaskQueue};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::tasks::{ChainCollector, ChainStep, CHAIN_TASK};

/// Default upper bound for `/tasks/chain` depth
pub const MAX_CHAIN_DEPTH: usize = 16;

/// Shared state for all handlers
pub struct AppState {
    pub queue: TaskQueue,
    /// Must be the collector the chain task was registered with
    pub chains: ChainCollector,
    pub header_name: HeaderName,
    pub task_timeout: Duration,
    pub max_chain_depth: usize,
}

impl AppState {
    pub fn new(queue: TaskQueue, chains: ChainCollector) -> Self {
        Self {
            queue,
            chains,
            header_name: HeaderName::from_static("x-request-id"),
            task_timeout: Duration::from_secs(30),
            max_chain_depth: MAX_CHAIN_DEPTH,
        }
    }

    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth.max(1);
        self
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Timeout(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Timeout(_) => "TIMEOUT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Timeout(_) => ApiError::Timeout(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::Timeout(msg) | ApiError::Internal(msg) => msg.clone(),
        };
        let body = ErrorBody {
            error: self.error_code().to_string(),
            message,
            correlation_id: context::correlation_id(),
        };

        (status, Json(body)).into_response()
    }
}

/// Create the router with all routes.
///
/// `correlation` wraps everything else, so request traces and handler logs
/// both run inside the request's flow.
pub fn create_router(state: Arc<AppState>, correlation: CorrelationIdLayer) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/echo", get(echo))
        .route("/tasks/chain", post(run_chain))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(correlation)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_open: bool,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_open: !state.queue.is_closed(),
    })
}

/// What the service saw of the request's correlation ID
#[derive(Debug, Serialize, Deserialize)]
pub struct EchoResponse {
    /// Value in the flow-local store
    pub correlation_id: Option<String>,
    /// Value in the request extensions
    pub extension: Option<String>,
    /// Raw request header as the handler received it
    pub request_header: Option<String>,
}

async fn echo(
    State(state): State<Arc<AppState>>,
    extension: Option<Extension<CorrelationId>>,
    headers: HeaderMap,
) -> Json<EchoResponse> {
    info!("Echoing correlation ID");
    Json(EchoResponse {
        correlation_id: context::correlation_id(),
        extension: extension.map(|Extension(id)| id.0),
        request_header: headers
            .get(&state.header_name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ChainRequest {
    #[serde(default)]
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainResponse {
    pub correlation_id: Option<String>,
    pub steps: Vec<ChainStep>,
}

async fn run_chain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChainRequest>,
) -> Result<Json<ChainResponse>, ApiError> {
    let depth = request.depth.unwrap_or(3);
    if depth == 0 || depth > state.max_chain_depth {
        return Err(ApiError::BadRequest(format!(
            "depth must be between 1 and {}",
            state.max_chain_depth
        )));
    }

    info!(depth, "Submitting task chain");
    let mut receiver = state.chains.open();
    state
        .queue
        .submit(CHAIN_TASK, receiver.payload(depth))?
        .wait(state.task_timeout)
        .await?;

    let steps = receiver.collect(depth, state.task_timeout).await;
    if steps.len() < depth {
        return Err(ApiError::Timeout(format!(
            "Chain completed {} of {} steps within {:?}",
            steps.len(),
            depth,
            state.task_timeout
        )));
    }

    Ok(Json(ChainResponse {
        correlation_id: context::correlation_id(),
        steps,
    }))
}
