//! Lakehouse Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the lakehouse pipeline.
//!
//! # Overview
//!
//! This crate provides functionality used by every pipeline stage:
//!
//! - **Error Handling**: the pipeline error taxonomy and result alias
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Checksums**: SHA-256 digests recorded for every written artifact
//! - **Types**: source descriptors and watermarks
//!
//! # Example
//!
//! ```no_run
//! use lakehouse_common::{Result, Watermark};
//!
//! fn newest(a: Watermark, b: Watermark) -> Result<Watermark> {
//!     Ok(if b.is_after(&a)? { b } else { a })
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{LakeError, Result};
pub use types::{ExtractionMode, SourceDescriptor, SourceKind, Watermark};
