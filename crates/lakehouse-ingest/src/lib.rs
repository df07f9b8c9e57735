//! Lakehouse ingestion
//!
//! Two-tier ingestion into an S3-compatible object store:
//!
//! - **Capture** lands source data verbatim under `bronze/`, one
//!   timestamped artifact per entity per run, tracking per-entity
//!   watermarks for incremental relational pulls.
//! - **Normalize** reads selected raw artifacts, applies a declarative
//!   schema (cast, flatten, explode, drop), deduplicates on a natural key
//!   and writes Parquet under `silver/`.
//!
//! # Example
//!
//! ```no_run
//! use lakehouse_ingest::{config::PipelineConfig, pipeline::Pipeline};
//!
//! # async fn run() -> lakehouse_common::Result<()> {
//! let pipeline = Pipeline::connect(PipelineConfig::load(None)?).await?;
//! pipeline.capture("api", None).await?.into_result()?;
//! pipeline.normalize("ibge_uf").await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod capture;
pub mod checkpoint;
pub mod config;
pub mod layout;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod storage;

pub use capture::{CaptureReport, CaptureResult, Clock, FixedClock, SystemClock};
pub use checkpoint::CheckpointStore;
pub use normalize::{DatasetSchema, NormalizeResult, Normalizer};
pub use storage::{FsStore, MemoryStore, ObjectStore, S3Store};
