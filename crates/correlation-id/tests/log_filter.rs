//! Log filter and record enrichment tests

use correlation_id::{
    context, CorrelationIdFilter, EnrichmentLayer, FlowSnapshot, LogFilter, LogRecord,
    MemorySink, TaskLineageFilter,
};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

fn log_record() -> LogRecord {
    LogRecord::new(Level::INFO, "", "Hello, world!")
}

fn with_cid<R>(f: impl FnOnce(&str) -> R) -> R {
    let cid = Uuid::new_v4().simple().to_string();
    context::sync_scope_with(FlowSnapshot::correlated(cid.clone()), || f(cid.as_str()))
}

#[test]
fn test_filter_has_uuid_length_attributes() {
    let filter = CorrelationIdFilter::new().with_uuid_length(8);
    assert_eq!(filter.uuid_length, Some(8));
}

#[test]
fn test_filter_adds_correlation_id() {
    with_cid(|cid| {
        let mut record = log_record();
        assert!(!record.has_attribute("correlation_id"));

        assert!(CorrelationIdFilter::new().filter(&mut record));
        assert_eq!(record.correlation_id(), Some(cid));
    });
}

#[test]
fn test_filter_truncates_correlation_id() {
    with_cid(|cid| {
        let mut record = log_record();
        CorrelationIdFilter::new()
            .with_uuid_length(8)
            .filter(&mut record);

        let truncated = record.correlation_id().unwrap();
        assert_eq!(truncated.len(), 8);
        assert!(cid.starts_with(truncated));
    });
}

#[test]
fn test_filter_is_idempotent() {
    with_cid(|cid| {
        let filter = CorrelationIdFilter::new().with_uuid_length(6);
        let mut record = log_record();
        filter.filter(&mut record);
        filter.filter(&mut record);
        assert_eq!(record.correlation_id(), Some(&cid[..6]));
        assert_eq!(record.message, "Hello, world!");
    });
}

#[test]
fn test_filter_default_value_when_absent() {
    context::sync_scope(|| {
        let mut record = log_record();
        CorrelationIdFilter::new()
            .with_default_value("-")
            .filter(&mut record);
        assert_eq!(record.correlation_id(), Some("-"));
    });
}

#[test]
fn test_lineage_filter_has_uuid_length_attributes() {
    let filter = TaskLineageFilter::new().with_uuid_length(8);
    assert_eq!(filter.uuid_length, Some(8));
}

#[test]
fn test_lineage_filter_adds_parent_id() {
    with_cid(|_| {
        context::set_task_parent_id("a").unwrap();

        let mut record = log_record();
        assert!(!record.has_attribute("celery_parent_id"));
        assert!(TaskLineageFilter::new().filter(&mut record));
        assert_eq!(record.attribute("celery_parent_id"), Some("a"));
    });
}

#[test]
fn test_lineage_filter_adds_current_id() {
    with_cid(|_| {
        context::set_task_current_id("b").unwrap();

        let mut record = log_record();
        assert!(!record.has_attribute("celery_current_id"));
        TaskLineageFilter::new().filter(&mut record);
        assert_eq!(record.attribute("celery_current_id"), Some("b"));
        assert!(record.has_attribute("celery_parent_id"));
        assert_eq!(record.attribute("celery_parent_id"), None);
    });
}

#[test]
fn test_lineage_filter_truncates_both() {
    context::sync_scope(|| {
        let parent = Uuid::new_v4().simple().to_string();
        let current = Uuid::new_v4().simple().to_string();
        context::set_task_parent_id(parent.clone()).unwrap();
        context::set_task_current_id(current.clone()).unwrap();

        let mut record = log_record();
        TaskLineageFilter::new()
            .with_uuid_length(4)
            .filter(&mut record);
        assert_eq!(record.attribute("celery_parent_id"), Some(&parent[..4]));
        assert_eq!(record.attribute("celery_current_id"), Some(&current[..4]));
    });
}

#[test]
fn test_installed_layer_enriches_subsequent_logs() {
    let sink = MemorySink::new();

    tracing::info!("Hello, world");
    assert!(sink.is_empty());

    let subscriber = tracing_subscriber::registry().with(
        EnrichmentLayer::new(sink.clone())
            .add_filter(CorrelationIdFilter::new())
            .add_filter(TaskLineageFilter::new()),
    );

    tracing::subscriber::with_default(subscriber, || {
        with_cid(|cid| {
            tracing::info!("Hello, world again");

            let last = sink.last().unwrap();
            assert_eq!(last.message, "Hello, world again");
            assert_eq!(last.correlation_id(), Some(cid));
            assert!(last.has_attribute("celery_parent_id"));
            assert!(last.has_attribute("celery_current_id"));
        });
    });
}
