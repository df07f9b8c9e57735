//! Relational capture tests
//!
//! Drive `RelationalCapture` against an in-memory source and object store:
//! - incremental pulls read and advance the per-entity watermark
//! - empty pulls write nothing and keep the watermark
//! - a failed artifact write never advances the watermark
//! - a corrupt checkpoint aborts the batch, other failures are isolated

mod common;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{at, init_tracing, row, FakeSource};
use lakehouse_common::{ExtractionMode, LakeError, SourceDescriptor, SourceKind, Watermark};
use lakehouse_ingest::capture::{RelationalCapture, RelationalTable};
use lakehouse_ingest::checkpoint::CheckpointStore;
use lakehouse_ingest::layout;
use lakehouse_ingest::source::SqlValue;
use lakehouse_ingest::storage::{MemoryStore, ObjectStore, CONTENT_TYPE_NDJSON};
use lakehouse_ingest::FixedClock;
use std::sync::Arc;

fn table(entity: &str, mode: ExtractionMode, change_column: Option<&str>) -> RelationalTable {
    RelationalTable {
        descriptor: SourceDescriptor::new("erp", entity, SourceKind::Relational, mode),
        table: format!("public.{entity}"),
        change_column: change_column.map(str::to_string),
    }
}

fn orders() -> RelationalTable {
    table("orders", ExtractionMode::Incremental, Some("id"))
}

fn order(id: i64, status: &str) -> lakehouse_ingest::source::Row {
    row(&[
        ("id", SqlValue::Int(id)),
        ("status", SqlValue::Text(status.to_string())),
    ])
}

fn capture_at(
    store: &Arc<MemoryStore>,
    source: &Arc<FakeSource>,
    now: DateTime<Utc>,
) -> RelationalCapture {
    RelationalCapture::new(store.clone(), source.clone(), Arc::new(FixedClock(now)))
}

async fn watermark(store: &Arc<MemoryStore>, entity: &str) -> Result<Option<Watermark>> {
    Ok(CheckpointStore::new(store.clone())
        .read_watermark("erp", entity)
        .await?)
}

// ============================================================================
// Incremental capture
// ============================================================================

#[tokio::test]
async fn test_first_incremental_capture_pulls_everything() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new"), order(2, "paid"), order(3, "new")]);

    let result = capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&orders())
        .await?;

    assert_eq!(result.rows_written, 3);
    assert_eq!(result.partition_key.to_string(), "date=20240301");
    assert_eq!(result.watermark, Some(Watermark::Version(3)));

    let artifact = result.artifact.expect("artifact written");
    assert_eq!(
        artifact.key,
        "bronze/erp/orders/date=20240301/orders_20240301_120000.jsonl"
    );
    assert_eq!(
        store.content_type(&artifact.key).await.as_deref(),
        Some(CONTENT_TYPE_NDJSON)
    );

    // No watermark yet, so the first pull is unfiltered
    let queries = source.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].1.is_none());

    assert_eq!(watermark(&store, "orders").await?, Some(Watermark::Version(3)));
    Ok(())
}

#[tokio::test]
async fn test_second_capture_only_pulls_newer_rows() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new"), order(2, "paid")]);
    capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&orders())
        .await?;

    source.insert("public.orders", vec![order(3, "new"), order(4, "new")]);
    let result = capture_at(&store, &source, at(2024, 3, 2, 6, 30, 0))
        .capture(&orders())
        .await?;

    assert_eq!(result.rows_written, 2);
    assert_eq!(result.watermark, Some(Watermark::Version(4)));

    let filter = source.queries()[1].1.clone().expect("filtered query");
    assert_eq!(filter.column, "id");
    assert_eq!(filter.after, Watermark::Version(2));

    let body = store.get(&result.artifact.unwrap().key).await?;
    let ids: Vec<i64> = String::from_utf8(body)?
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 4]);

    // Both runs are kept, one partition per capture day
    let keys = store.list(&layout::raw_prefix("erp", "orders")).await?;
    assert_eq!(keys.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_pull_writes_nothing() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new")]);
    capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&orders())
        .await?;
    let objects_before = store.len().await;

    let result = capture_at(&store, &source, at(2024, 3, 1, 13, 0, 0))
        .capture(&orders())
        .await?;

    assert_eq!(result.rows_written, 0);
    assert!(result.artifact.is_none());
    assert_eq!(result.watermark, Some(Watermark::Version(1)));
    assert_eq!(store.len().await, objects_before);
    Ok(())
}

#[tokio::test]
async fn test_timestamp_change_column() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    let updated = at(2024, 2, 29, 23, 59, 59);
    source.insert(
        "public.customers",
        vec![
            row(&[("id", SqlValue::Int(1)), ("updated_at", SqlValue::Timestamp(at(2024, 1, 1, 0, 0, 0)))]),
            row(&[("id", SqlValue::Int(2)), ("updated_at", SqlValue::Timestamp(updated))]),
        ],
    );

    let result = capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&table("customers", ExtractionMode::Incremental, Some("updated_at")))
        .await?;

    assert_eq!(result.watermark, Some(Watermark::Timestamp(updated)));

    let document = store.get(&layout::checkpoint_key("erp")).await?;
    let document: serde_json::Value = serde_json::from_slice(&document)?;
    assert_eq!(document["customers"], "2024-02-29T23:59:59Z");

    let body = String::from_utf8(store.get(&result.artifact.unwrap().key).await?)?;
    assert!(body.contains("\"updated_at\":\"2024-02-29T23:59:59Z\""));
    Ok(())
}

#[tokio::test]
async fn test_incremental_without_change_column_is_a_config_error() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());

    let err = capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&table("orders", ExtractionMode::Incremental, None))
        .await
        .unwrap_err();

    assert!(matches!(err, LakeError::Config(_)));
    assert!(source.queries().is_empty());
    Ok(())
}

// ============================================================================
// Full capture
// ============================================================================

#[tokio::test]
async fn test_full_capture_ignores_and_keeps_checkpoint() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.regions", vec![order(1, "n"), order(2, "s")]);

    let regions = table("regions", ExtractionMode::Full, Some("id"));
    for hour in [10, 11] {
        let result = capture_at(&store, &source, at(2024, 3, 1, hour, 0, 0))
            .capture(&regions)
            .await?;
        assert_eq!(result.rows_written, 2);
        assert!(result.watermark.is_none());
    }

    assert!(source.queries().iter().all(|(_, filter)| filter.is_none()));
    assert!(!store.exists(&layout::checkpoint_key("erp")).await?);
    Ok(())
}

#[tokio::test]
async fn test_same_second_capture_does_not_overwrite() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.regions", vec![order(1, "n")]);
    let regions = table("regions", ExtractionMode::Full, None);
    let capture = capture_at(&store, &source, at(2024, 3, 1, 10, 0, 0));

    capture.capture(&regions).await?;
    let err = capture.capture(&regions).await.unwrap_err();

    assert!(matches!(err, LakeError::ArtifactExists(_)));
    Ok(())
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failed_write_keeps_previous_watermark() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new"), order(2, "new")]);
    capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture(&orders())
        .await?;

    source.insert("public.orders", vec![order(3, "new")]);
    store.fail_writes_under(layout::raw_prefix("erp", "orders")).await;

    let err = capture_at(&store, &source, at(2024, 3, 1, 13, 0, 0))
        .capture(&orders())
        .await
        .unwrap_err();
    assert!(matches!(err, LakeError::Storage(_)));
    assert_eq!(watermark(&store, "orders").await?, Some(Watermark::Version(2)));

    // Once storage recovers the same rows are pulled again
    store.clear_failures().await;
    let result = capture_at(&store, &source, at(2024, 3, 1, 14, 0, 0))
        .capture(&orders())
        .await?;
    assert_eq!(result.rows_written, 1);
    assert_eq!(result.watermark, Some(Watermark::Version(3)));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_checkpoint_aborts_batch() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new")]);
    store
        .put(&layout::checkpoint_key("erp"), b"{not json".to_vec(), "application/json")
        .await?;

    let err = capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture_all("erp", &[orders(), table("customers", ExtractionMode::Incremental, Some("id"))])
        .await
        .unwrap_err();

    assert!(matches!(err, LakeError::CorruptCheckpoint { .. }));
    assert!(store.list(&layout::raw_prefix("erp", "orders")).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_one_failing_table_does_not_stop_siblings() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FakeSource::new());
    source.insert("public.orders", vec![order(1, "new")]);
    source.insert("public.items", vec![order(10, "x")]);
    source.break_table("public.customers");

    let tables = [
        orders(),
        table("customers", ExtractionMode::Incremental, Some("id")),
        table("items", ExtractionMode::Full, None),
    ];
    let report = capture_at(&store, &source, at(2024, 3, 1, 12, 0, 0))
        .capture_all("erp", &tables)
        .await?;

    assert_eq!(report.total(), 3);
    assert_eq!(report.artifacts_written(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "customers");
    assert!(matches!(report.failures[0].1, LakeError::SourceUnavailable { .. }));
    assert_eq!(watermark(&store, "customers").await?, None);

    match report.into_result() {
        Err(LakeError::PartialBatchFailure { failed, total, .. }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 3);
        },
        other => panic!("expected partial failure, got {other:?}"),
    }
    Ok(())
}
