//! Schema normalization engine
//!
//! Reads the raw artifacts selected for a dataset, applies its schema's
//! field rules, deduplicates on the natural key and replaces the refined
//! prefix with the result. Raw artifacts are never modified. Re-running
//! over unchanged raw data produces byte-identical refined objects.

use lakehouse_common::{LakeError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::capture::Clock;
use crate::layout::{self, capture_stamp, RawArtifact};
use crate::storage::{ObjectStore, CONTENT_TYPE_PARQUET};

pub mod cast;
pub mod columnar;
pub mod dedupe;
pub mod parse;
pub mod schema;
pub mod shape;

pub use schema::{DatasetSchema, FieldSpec, FieldType, OutputSpec, Rule, WriteMode};

use shape::{ShapedRow, Shaper};

/// Outcome of one refinement run
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeResult {
    pub dataset: String,
    pub artifacts_read: usize,
    pub records_read: u64,
    /// Rows across all outputs
    pub records_written: u64,
    /// Values that did not cast and were written as null
    pub cast_failures: u64,
    /// Malformed raw records plus rows whose natural key failed to cast
    pub records_dropped: u64,
    pub duplicates_removed: u64,
    /// The first cast failure of the run, for diagnosis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_violation: Option<String>,
    /// Objects removed from the refined prefix
    pub stale_objects_removed: usize,
    pub outputs: Vec<OutputSummary>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub name: String,
    pub key: String,
    pub rows: u64,
    pub checksum: String,
}

pub struct Normalizer {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

impl Normalizer {
    pub fn new(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self, schema), fields(dataset = %schema.dataset))]
    pub async fn normalize(&self, schema: &DatasetSchema) -> Result<NormalizeResult> {
        schema.validate()?;
        let started = Instant::now();
        let mut result = NormalizeResult {
            dataset: schema.dataset.clone(),
            ..Default::default()
        };

        let keys = self
            .store
            .list(&layout::raw_prefix(&schema.source, &schema.entity))
            .await?;
        let artifacts = layout::select(&keys, &schema.source, &schema.entity, schema.selection());
        info!(
            "Refining {} from {} raw artifact(s) ({:?})",
            schema.dataset,
            artifacts.len(),
            schema.selection()
        );
        if artifacts.is_empty() {
            warn!(
                "No raw artifacts under {}; outputs will be empty",
                layout::raw_prefix(&schema.source, &schema.entity)
            );
        }

        let loaded = self.load(&artifacts, &mut result).await?;

        // Encode every output before writing any, so a failure leaves the
        // refined prefix untouched.
        let mut encoded = Vec::with_capacity(schema.outputs.len());
        for output in &schema.outputs {
            let (bytes, rows) = refine_output(output, &loaded, &mut result)?;
            encoded.push((output, bytes, rows));
        }

        let prefix = layout::refined_prefix(&schema.source, &schema.entity);
        let mut written = BTreeSet::new();
        for (output, bytes, rows) in encoded {
            let object = match schema.write_mode {
                WriteMode::Overwrite => output.file_name(),
                WriteMode::Append => format!("{}_{}.parquet", output.name, capture_stamp(self.clock.now())),
            };
            let key = layout::refined_key(&schema.source, &schema.entity, &object);
            if schema.write_mode == WriteMode::Append && self.store.exists(&key).await? {
                return Err(LakeError::ArtifactExists(key));
            }
            let ack = self.store.put(&key, bytes, CONTENT_TYPE_PARQUET).await?;
            debug!("Wrote {} rows to {}", rows, ack.key);

            written.insert(ack.key.clone());
            result.records_written += rows;
            result.outputs.push(OutputSummary {
                name: output.name.clone(),
                key: ack.key,
                rows,
                checksum: ack.checksum,
            });
        }

        result.stale_objects_removed = self.sweep(&prefix, &written, schema.write_mode).await?;
        result.duration_ms = started.elapsed().as_millis();

        info!(
            "Refined {}: {} rows written, {} cast failures, {} dropped, {} duplicates removed",
            schema.dataset,
            result.records_written,
            result.cast_failures,
            result.records_dropped,
            result.duplicates_removed
        );
        if let Some(violation) = &result.first_violation {
            warn!("{}: first cast failure: {}", schema.dataset, violation);
        }
        Ok(result)
    }

    async fn load(&self, artifacts: &[RawArtifact], result: &mut NormalizeResult) -> Result<Vec<Vec<parse::Record>>> {
        let mut loaded = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let data = self.store.get(&artifact.key).await?;
            let parsed = parse::parse_artifact(&artifact.key, &artifact.extension, &data)?;
            debug!(
                "{}: {} records, {} malformed",
                artifact.key,
                parsed.records.len(),
                parsed.malformed
            );
            result.artifacts_read += 1;
            result.records_read += parsed.records.len() as u64;
            result.records_dropped += parsed.malformed;
            loaded.push(parsed.records);
        }
        Ok(loaded)
    }

    /// Remove everything under `prefix` that this run did not write. In
    /// append mode only committer markers are removed.
    async fn sweep(&self, prefix: &str, written: &BTreeSet<String>, mode: WriteMode) -> Result<usize> {
        let mut removed = 0;
        for key in self.store.list(prefix).await? {
            if written.contains(&key) {
                continue;
            }
            if mode == WriteMode::Overwrite || layout::is_marker(&key) {
                debug!("Removing stale object {}", key);
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn refine_output(output: &OutputSpec, loaded: &[Vec<parse::Record>], result: &mut NormalizeResult) -> Result<(Vec<u8>, u64)> {
    let shaper = Shaper::new(output);

    let mut rows: Vec<ShapedRow> = Vec::new();
    // Oldest artifact first, so later captures win deduplication.
    for records in loaded {
        for record in records {
            let shaped = shaper.shape(record);
            result.cast_failures += shaped.cast_failures;
            if result.first_violation.is_none() {
                result.first_violation = shaped.first_violation.map(|e| e.to_string());
            }
            rows.extend(shaped.rows);
        }
    }

    let (rows, stats) = dedupe::dedupe(rows, shaper.key_columns());
    result.duplicates_removed += stats.duplicates_removed;
    result.records_dropped += stats.dropped;
    if stats.dropped > 0 {
        warn!(
            "{}: dropped {} row(s) whose natural key did not cast",
            output.name, stats.dropped
        );
    }

    let batch = columnar::to_record_batch(shaper.columns(), &rows)?;
    let bytes = columnar::write_parquet(&batch)?;
    Ok((bytes, rows.len() as u64))
}
