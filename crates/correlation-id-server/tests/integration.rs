//! Integration tests for the correlation ID service

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use correlation_id::{
    is_valid_uuid4, CorrelationIdFilter, CorrelationIdLayer, EnrichmentLayer, MemorySink,
    SharedTracker, TaskLineageFilter, TaskSettings,
};
use correlation_id_server::handler::MAX_CHAIN_DEPTH;
use correlation_id_server::{create_router, register_tasks, AppState, ChainCollector, ChainStep};
use correlation_id_server::handler::{ChainResponse, EchoResponse, ErrorBody, HealthResponse};
use correlation_id_tasks::{TaskQueue, TaskRegistry, TaskSignals};
use serde::de::DeserializeOwned;
use tower::ServiceExt;
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

const WORKERS: usize = 3;

fn app_with(
    correlation: CorrelationIdLayer,
    workers: usize,
    task_timeout: Duration,
) -> (Router, TaskQueue) {
    let chains = ChainCollector::new();
    let mut registry = TaskRegistry::new();
    register_tasks(&mut registry, chains.clone());
    let queue = TaskQueue::new(
        registry,
        TaskSignals::from_settings(&TaskSettings::default(), SharedTracker::noop()),
    );
    queue.spawn_workers(workers);

    let state = Arc::new(AppState::new(queue.clone(), chains).with_task_timeout(task_timeout));
    (create_router(state, correlation), queue)
}

fn layer() -> CorrelationIdLayer {
    CorrelationIdLayer::builder()
        .tracker(correlation_id::NoopTracker)
        .build()
        .unwrap()
}

fn app() -> (Router, TaskQueue) {
    app_with(layer(), WORKERS, Duration::from_secs(10))
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn body_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(id) = id {
        builder = builder.header("X-Request-ID", id);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_chain(body: &str, id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/tasks/chain")
        .header("content-type", "application/json");
    if let Some(id) = id {
        builder = builder.header("X-Request-ID", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn response_id(response: &axum::response::Response) -> String {
    response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_generates_id() {
    let (app, queue) = app();

    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(is_valid_uuid4(&response_id(&response)));

    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, "healthy");
    assert!(health.queue_open);
    queue.shutdown();
}

#[tokio::test]
async fn test_echo_keeps_valid_header() {
    let (app, queue) = app();
    let id = new_id();

    let response = app.oneshot(get("/echo", Some(&id))).await.unwrap();
    assert_eq!(response_id(&response), id);

    let echo: EchoResponse = body_json(response).await;
    assert_eq!(echo.correlation_id.as_deref(), Some(id.as_str()));
    assert_eq!(echo.extension.as_deref(), Some(id.as_str()));
    assert_eq!(echo.request_header.as_deref(), Some(id.as_str()));
    queue.shutdown();
}

#[tokio::test]
async fn test_echo_sees_rewritten_request_header() {
    let (app, queue) = app_with(
        CorrelationIdLayer::builder()
            .tracker(correlation_id::NoopTracker)
            .update_request_header(true)
            .build()
            .unwrap(),
        WORKERS,
        Duration::from_secs(10),
    );

    let response = app.oneshot(get("/echo", Some("not-a-uuid"))).await.unwrap();
    let id = response_id(&response);
    assert_ne!(id, "not-a-uuid");

    let echo: EchoResponse = body_json(response).await;
    assert_eq!(echo.request_header.as_deref(), Some(id.as_str()));
    assert_eq!(echo.correlation_id.as_deref(), Some(id.as_str()));
    queue.shutdown();
}

#[tokio::test]
async fn test_chain_carries_request_id_and_lineage() {
    let (app, queue) = app();
    let id = new_id();

    let response = app
        .oneshot(post_chain(r#"{"depth": 3}"#, Some(&id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_id(&response), id);

    let chain: ChainResponse = body_json(response).await;
    assert_eq!(chain.correlation_id.as_deref(), Some(id.as_str()));
    assert_eq!(chain.steps.len(), 3);

    let mut parent: Option<String> = None;
    for step in &chain.steps {
        let ChainStep {
            correlation_id,
            parent_id,
            current_id,
            ..
        } = step;
        assert_eq!(correlation_id.as_deref(), Some(id.as_str()));
        assert_eq!(parent_id, &parent);
        assert!(current_id.is_some());
        parent = current_id.clone();
    }
    queue.shutdown();
}

#[tokio::test]
async fn test_concurrent_deep_chains_leave_workers_free() {
    let (app, queue) = app_with(layer(), 2, Duration::from_secs(5));
    let body = format!(r#"{{"depth": {}}}"#, MAX_CHAIN_DEPTH);

    let (first, second) = tokio::join!(
        app.clone().oneshot(post_chain(&body, None)),
        app.clone().oneshot(post_chain(&body, None)),
    );
    for response in [first.unwrap(), second.unwrap()] {
        assert_eq!(response.status(), StatusCode::OK);
        let id = response_id(&response);
        let chain: ChainResponse = body_json(response).await;
        assert_eq!(chain.steps.len(), MAX_CHAIN_DEPTH);
        assert!(chain
            .steps
            .iter()
            .all(|step| step.correlation_id.as_deref() == Some(id.as_str())));
    }

    let response = app
        .oneshot(post_chain(r#"{"depth": 1}"#, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    queue.shutdown();
}

#[tokio::test]
async fn test_chain_depth_is_bounded() {
    let (app, queue) = app();
    let id = new_id();

    let response = app
        .oneshot(post_chain(r#"{"depth": 50}"#, Some(&id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_id(&response), id);

    let error: ErrorBody = body_json(response).await;
    assert_eq!(error.error, "BAD_REQUEST");
    assert_eq!(error.correlation_id.as_deref(), Some(id.as_str()));
    queue.shutdown();
}

#[tokio::test]
async fn test_logs_follow_request_into_tasks() {
    let sink = MemorySink::new();
    let subscriber = tracing_subscriber::registry().with(
        EnrichmentLayer::new(sink.clone())
            .add_filter(CorrelationIdFilter::new())
            .add_filter(TaskLineageFilter::new()),
    );
    let _guard = tracing::subscriber::set_default(subscriber);

    let (app, queue) = app();
    let id = new_id();

    let response = app
        .oneshot(post_chain(r#"{"depth": 2}"#, Some(&id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submitted = sink.find("Submitting task chain");
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].correlation_id(), Some(id.as_str()));

    let steps = sink.find("Running chain step");
    assert_eq!(steps.len(), 2);
    for step in &steps {
        assert_eq!(step.correlation_id(), Some(id.as_str()));
        assert!(step.attribute("celery_current_id").is_some());
    }
    queue.shutdown();
}
