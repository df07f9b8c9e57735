//! Full and incremental capture of relational tables

use lakehouse_common::{ExtractionMode, LakeError, Result, SourceDescriptor, Watermark};
use serde_jsonlines::WriteExt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{ArtifactInfo, CaptureReport, CaptureResult, Clock, RunState, RunTracker};
use crate::checkpoint::CheckpointStore;
use crate::layout::{self, PartitionKey};
use crate::source::{ChangeFilter, RelationalSource};
use crate::storage::{ObjectStore, CONTENT_TYPE_NDJSON};

/// One table and how to capture it
#[derive(Debug, Clone)]
pub struct RelationalTable {
    pub descriptor: SourceDescriptor,
    /// Table name in the source, optionally schema-qualified
    pub table: String,
    /// Monotonic column compared against the watermark; required for
    /// incremental mode
    pub change_column: Option<String>,
}

pub struct RelationalCapture {
    store: Arc<dyn ObjectStore>,
    checkpoints: CheckpointStore,
    source: Arc<dyn RelationalSource>,
    clock: Arc<dyn Clock>,
}

impl RelationalCapture {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn RelationalSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(store.clone()),
            store,
            source,
            clock,
        }
    }

    /// Capture every table. A corrupt checkpoint aborts the whole batch;
    /// any other failure is isolated to its table.
    pub async fn capture_all(&self, source: &str, tables: &[RelationalTable]) -> Result<CaptureReport> {
        let mut report = CaptureReport::new(source);
        for table in tables {
            match self.capture(table).await {
                Err(err @ LakeError::CorruptCheckpoint { .. }) => return Err(err),
                outcome => report.record(&table.descriptor.entity, outcome),
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, table), fields(entity = %table.descriptor.id()))]
    pub async fn capture(&self, table: &RelationalTable) -> Result<CaptureResult> {
        let mut tracker = RunTracker::new(&table.descriptor);
        let outcome = self.run(table, &mut tracker).await;
        match &outcome {
            Ok(_) => tracker.advance(RunState::Idle)?,
            Err(_) => tracker.reset(),
        }
        outcome
    }

    async fn run(&self, table: &RelationalTable, tracker: &mut RunTracker) -> Result<CaptureResult> {
        let descriptor = &table.descriptor;
        let started = self.clock.now();
        let partition_key = PartitionKey::for_capture(started);

        tracker.advance(RunState::Extracting)?;

        let change_column = match descriptor.mode {
            ExtractionMode::Full => None,
            ExtractionMode::Incremental => Some(table.change_column.as_deref().ok_or_else(|| {
                LakeError::config(format!(
                    "{}: incremental capture needs a change column",
                    descriptor.id()
                ))
            })?),
        };

        let previous = match change_column {
            Some(_) => {
                self.checkpoints
                    .read_watermark(&descriptor.source, &descriptor.entity)
                    .await?
            }
            None => None,
        };

        let filter = match (change_column, &previous) {
            (Some(column), Some(after)) => Some(ChangeFilter {
                column: column.to_string(),
                after: after.clone(),
            }),
            _ => None,
        };

        match &filter {
            Some(f) => info!("Incremental capture of {} after {}", table.table, f.after),
            None => info!("Full capture of {}", table.table),
        }

        let rows = self.source.query(&table.table, filter.as_ref()).await?;

        if rows.is_empty() {
            info!("No new rows in {}; nothing written", table.table);
            return Ok(CaptureResult {
                source: descriptor.source.clone(),
                entity: descriptor.entity.clone(),
                rows_written: 0,
                partition_key,
                artifact: None,
                watermark: previous,
            });
        }

        let observed = change_column.and_then(|column| {
            let values = rows
                .iter()
                .filter_map(|row| row.get(column).and_then(|v| v.as_watermark()));
            Watermark::max_of(values)
        });
        if change_column.is_some() && observed.is_none() {
            warn!(
                "{}: change column holds no integer or timestamp values; watermark not advanced",
                descriptor.id()
            );
        }

        let mut body = Vec::new();
        body.write_json_lines(rows.iter())?;

        tracker.advance(RunState::Writing)?;
        let key = layout::raw_key(&descriptor.source, &descriptor.entity, started, "jsonl");
        if self.store.exists(&key).await? {
            return Err(LakeError::ArtifactExists(key));
        }
        let ack = self.store.put(&key, body, CONTENT_TYPE_NDJSON).await?;

        let watermark = match observed {
            Some(candidate) => {
                tracker.advance(RunState::Checkpointing)?;
                Some(
                    self.checkpoints
                        .write_watermark(&descriptor.source, &descriptor.entity, &candidate)
                        .await?,
                )
            }
            None => previous,
        };

        info!("Captured {} rows into {}", rows.len(), ack.key);

        Ok(CaptureResult {
            source: descriptor.source.clone(),
            entity: descriptor.entity.clone(),
            rows_written: rows.len() as u64,
            partition_key,
            artifact: Some(ArtifactInfo::from(ack)),
            watermark,
        })
    }
}
