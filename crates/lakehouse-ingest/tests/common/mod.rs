//! Shared helpers for lakehouse-ingest integration tests
//!
//! - `init_tracing` routes logs through the test writer
//! - `at` builds fixed capture instants
//! - `ints` / `strings` / `row_count` read refined Parquet columns back
//! - `FakeSource` is an in-memory relational source that honours change
//!   filters the way the PostgreSQL source does
//! - `TestPostgres` / `TestMinio` start containers for the live tests

#![allow(dead_code)]

use anyhow::{Context, Result};
use arrow::array::{Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use chrono::{DateTime, TimeZone, Utc};
use lakehouse_common::{LakeError, Watermark};
use lakehouse_ingest::source::{ChangeFilter, RelationalSource, Row, SqlValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Mutex;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lakehouse_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
}

pub fn row(values: &[(&str, SqlValue)]) -> Row {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn ints(batches: &[RecordBatch], column: &str) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|batch| {
            let array = batch
                .column_by_name(column)
                .unwrap()
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap();
            array.iter().collect::<Vec<_>>()
        })
        .collect()
}

pub fn strings(batches: &[RecordBatch], column: &str) -> Vec<Option<String>> {
    batches
        .iter()
        .flat_map(|batch| {
            let array = batch
                .column_by_name(column)
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            array.iter().map(|v| v.map(str::to_string)).collect::<Vec<_>>()
        })
        .collect()
}

pub fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

// ============================================================================
// In-memory relational source
// ============================================================================

#[derive(Default)]
pub struct FakeSource {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    unavailable: Mutex<Vec<String>>,
    queries: Mutex<Vec<(String, Option<ChangeFilter>)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every query against `table` fail
    pub fn break_table(&self, table: &str) {
        self.unavailable.lock().unwrap().push(table.to_string());
    }

    pub fn queries(&self) -> Vec<(String, Option<ChangeFilter>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelationalSource for FakeSource {
    async fn query(
        &self,
        table: &str,
        filter: Option<&ChangeFilter>,
    ) -> lakehouse_common::Result<Vec<Row>> {
        self.queries
            .lock()
            .unwrap()
            .push((table.to_string(), filter.cloned()));

        if self.unavailable.lock().unwrap().iter().any(|t| t == table) {
            return Err(LakeError::source_unavailable(table, "connection refused"));
        }

        let rows = self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();

        let Some(filter) = filter else {
            return Ok(rows);
        };

        let mut selected: Vec<(Watermark, Row)> = Vec::new();
        for row in rows {
            if let Some(value) = row.get(&filter.column).and_then(SqlValue::as_watermark) {
                if value.is_after(&filter.after)? {
                    selected.push((value, row));
                }
            }
        }
        selected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(selected.into_iter().map(|(_, row)| row).collect())
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub const TEST_BUCKET: &str = "lakehouse-test";

pub struct TestMinio {
    _container: ContainerAsync<GenericImage>,
    endpoint: String,
}

impl TestMinio {
    /// Start MinIO and create `TEST_BUCKET`
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", "minioadmin")
            .with_env_var("MINIO_ROOT_PASSWORD", "minioadmin")
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;
        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                "minioadmin",
                "minioadmin",
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .build();
        aws_sdk_s3::Client::from_conf(config)
            .create_bucket()
            .bucket(TEST_BUCKET)
            .send()
            .await
            .context("Failed to create S3 bucket")?;

        Ok(Self {
            _container: container,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
