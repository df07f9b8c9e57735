//! Raw capture
//!
//! Pulls data from a source and lands it, byte-for-byte, as one timestamped
//! artifact per entity per run under `bronze/`. Runs move through
//! `Idle -> Extracting -> Writing -> Checkpointing -> Idle`; any failure
//! returns the run to `Idle` without advancing the watermark.

use chrono::{DateTime, Utc};
use lakehouse_common::{LakeError, Result, SourceDescriptor, Watermark};
use serde::Serialize;
use tracing::debug;

use crate::layout::PartitionKey;
use crate::storage::PutAck;

pub mod api;
pub mod local_files;
pub mod relational;

pub use api::{ApiCapture, ApiEndpoint};
pub use local_files::{LocalFileBatch, LocalFileCapture};
pub use relational::{RelationalCapture, RelationalTable};

/// Source of the capture timestamp; fixed in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Writing,
    Checkpointing,
}

/// Tracks one capture run through its states
#[derive(Debug)]
pub struct RunTracker {
    id: String,
    state: RunState,
}

impl RunTracker {
    pub fn new(descriptor: &SourceDescriptor) -> Self {
        Self {
            id: descriptor.id(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`. Going back to `Idle` is always allowed.
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        use RunState::*;
        let allowed = matches!(
            (self.state, next),
            (Idle, Extracting) | (Extracting, Writing) | (Writing, Checkpointing) | (_, Idle)
        );
        if !allowed {
            return Err(LakeError::config(format!(
                "{}: illegal capture transition {:?} -> {:?}",
                self.id, self.state, next
            )));
        }
        debug!("{}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Abandon the run after a failure
    pub fn reset(&mut self) {
        if self.state != RunState::Idle {
            debug!("{}: {:?} -> Idle (aborted)", self.id, self.state);
            self.state = RunState::Idle;
        }
    }
}

/// Outcome of one entity capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub source: String,
    pub entity: String,
    pub rows_written: u64,
    /// Partition the artifact went to, or would have gone to when nothing was
    /// written
    pub partition_key: PartitionKey,
    /// Key, checksum and size of the artifact; `None` for an empty capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    /// Watermark in effect after the run (incremental captures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Watermark>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub key: String,
    pub checksum: String,
    pub size: u64,
}

impl From<PutAck> for ArtifactInfo {
    fn from(ack: PutAck) -> Self {
        Self {
            key: ack.key,
            checksum: ack.checksum,
            size: ack.size,
        }
    }
}

/// Results of capturing every entity of one source
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub source: String,
    pub results: Vec<CaptureResult>,
    pub failures: Vec<(String, LakeError)>,
}

impl CaptureReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, entity: &str, outcome: Result<CaptureResult>) {
        match outcome {
            Ok(result) => self.results.push(result),
            Err(err) => self.failures.push((entity.to_string(), err)),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn rows_written(&self) -> u64 {
        self.results.iter().map(|r| r.rows_written).sum()
    }

    pub fn artifacts_written(&self) -> usize {
        self.results.iter().filter(|r| r.artifact.is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Err(PartialBatchFailure)` when any entity failed
    pub fn into_result(self) -> Result<Vec<CaptureResult>> {
        if self.failures.is_empty() {
            Ok(self.results)
        } else {
            Err(LakeError::partial(self.total(), &self.failures))
        }
    }
}
