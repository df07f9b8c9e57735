//! Capture of files dropped into a local staging directory
//!
//! Each matching file becomes one raw artifact whose entity is the file
//! stem. With `mark_processed`, a hidden `.<file>.ingested` marker holding
//! the artifact key is written next to each captured file and such files
//! are skipped on later runs.

use globset::{Glob, GlobMatcher};
use lakehouse_common::{ExtractionMode, LakeError, Result, SourceDescriptor, SourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use super::{ArtifactInfo, CaptureReport, CaptureResult, Clock, RunState, RunTracker};
use crate::layout::{self, PartitionKey};
use crate::storage::{content_type_for, ObjectStore};

const MARKER_SUFFIX: &str = ".ingested";

#[derive(Debug, Clone)]
pub struct LocalFileBatch {
    pub source: String,
    pub staging_dir: PathBuf,
    /// Glob matched against file names, e.g. `*.csv`
    pub pattern: String,
    pub mark_processed: bool,
}

pub struct LocalFileCapture {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

/// Marker path for a staged file
pub fn marker_path(file: &Path) -> Option<PathBuf> {
    let name = file.file_name()?.to_str()?;
    Some(file.with_file_name(format!(".{name}{MARKER_SUFFIX}")))
}

impl LocalFileCapture {
    pub fn new(store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Files in the staging directory that this batch would capture, sorted
    /// by name
    pub async fn pending(&self, batch: &LocalFileBatch) -> Result<Vec<PathBuf>> {
        let matcher = compile(&batch.pattern)?;

        let mut entries = tokio::fs::read_dir(&batch.staging_dir).await.map_err(|e| {
            LakeError::source_unavailable(
                &batch.source,
                format!("cannot read {}: {e}", batch.staging_dir.display()),
            )
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type().await?.is_file() || !matcher.is_match(name) {
                continue;
            }
            if batch.mark_processed {
                if let Some(marker) = marker_path(&path) {
                    let ingested = tokio::fs::try_exists(&marker).await.map_err(|e| {
                        LakeError::source_unavailable(
                            &batch.source,
                            format!("cannot check marker {}: {e}", marker.display()),
                        )
                    })?;
                    if ingested {
                        debug!("Skipping {}: already ingested", path.display());
                        continue;
                    }
                }
            }
            files.push(path);
        }

        files.sort();
        Ok(files)
    }

    /// Capture every pending file. Failures are isolated per file.
    #[instrument(skip(self, batch), fields(source = %batch.source))]
    pub async fn capture_all(&self, batch: &LocalFileBatch) -> Result<CaptureReport> {
        let files = self.pending(batch).await?;
        info!("{} file(s) pending in {}", files.len(), batch.staging_dir.display());

        let mut report = CaptureReport::new(&batch.source);
        for file in files {
            let entity = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let outcome = self.capture_file(batch, &file).await;
            if let Err(err) = &outcome {
                error!("Capture of {} failed: {}", file.display(), err);
            }
            report.record(&entity, outcome);
        }
        Ok(report)
    }

    pub async fn capture_file(&self, batch: &LocalFileBatch, file: &Path) -> Result<CaptureResult> {
        let entity = file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LakeError::config(format!("unusable file name {}", file.display())))?;
        layout::validate_segment("entity", entity)?;

        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "bin".to_string());

        let descriptor = SourceDescriptor::new(
            &batch.source,
            entity,
            SourceKind::LocalFiles,
            ExtractionMode::Full,
        );
        let mut tracker = RunTracker::new(&descriptor);
        let outcome = self
            .run(&descriptor, batch, file, &extension, &mut tracker)
            .await;
        match &outcome {
            Ok(_) => tracker.advance(RunState::Idle)?,
            Err(_) => tracker.reset(),
        }
        outcome
    }

    async fn run(
        &self,
        descriptor: &SourceDescriptor,
        batch: &LocalFileBatch,
        file: &Path,
        extension: &str,
        tracker: &mut RunTracker,
    ) -> Result<CaptureResult> {
        let started = self.clock.now();

        tracker.advance(RunState::Extracting)?;
        let data = tokio::fs::read(file).await.map_err(|e| {
            LakeError::source_unavailable(descriptor.id(), format!("cannot read {}: {e}", file.display()))
        })?;
        let rows = count_records(extension, &data);

        tracker.advance(RunState::Writing)?;
        let key = layout::raw_key(&descriptor.source, &descriptor.entity, started, extension);
        if self.store.exists(&key).await? {
            return Err(LakeError::ArtifactExists(key));
        }
        let ack = self.store.put(&key, data, content_type_for(extension)).await?;

        if batch.mark_processed {
            if let Some(marker) = marker_path(file) {
                tokio::fs::write(&marker, ack.key.as_bytes()).await.map_err(|e| {
                    LakeError::storage(format!(
                        "artifact {} written but marker {} failed: {e}",
                        ack.key,
                        marker.display()
                    ))
                })?;
            }
        }

        info!("Captured {} into {}", file.display(), ack.key);

        Ok(CaptureResult {
            source: descriptor.source.clone(),
            entity: descriptor.entity.clone(),
            rows_written: rows,
            partition_key: PartitionKey::for_capture(started),
            artifact: Some(ArtifactInfo::from(ack)),
            watermark: None,
        })
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| LakeError::config(format!("invalid file pattern '{pattern}': {e}")))
}

/// Best-effort record count for logs and results; never fails
fn count_records(extension: &str, data: &[u8]) -> u64 {
    let non_blank_lines = || {
        data.split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .count() as u64
    };
    match extension {
        "json" => match serde_json::from_slice::<serde_json::Value>(data) {
            Ok(serde_json::Value::Array(items)) => items.len() as u64,
            Ok(_) => 1,
            Err(_) => 0,
        },
        "jsonl" | "ndjson" => non_blank_lines(),
        "csv" => non_blank_lines().saturating_sub(1),
        _ => 0,
    }
}
