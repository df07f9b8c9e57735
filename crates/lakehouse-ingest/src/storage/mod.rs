//! Object store adapter
//!
//! Every stage talks to storage through [`ObjectStore`]. Keys are
//! `/`-separated paths relative to the bucket (or root directory). A `put`
//! is atomic: a reader sees the old object, no object, or the complete new
//! one.

use async_trait::async_trait;
use lakehouse_common::Result;

pub mod config;
mod fs;
mod memory;
mod s3;

pub use config::StorageConfig;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";
pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_PARQUET: &str = "application/vnd.apache.parquet";
pub const CONTENT_TYPE_OCTET: &str = "application/octet-stream";

/// Content type for a raw artifact extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "json" => CONTENT_TYPE_JSON,
        "jsonl" | "ndjson" => CONTENT_TYPE_NDJSON,
        "csv" => CONTENT_TYPE_CSV,
        "parquet" => CONTENT_TYPE_PARQUET,
        _ => CONTENT_TYPE_OCTET,
    }
}

/// Acknowledgement of a completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub key: String,
    pub checksum: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Every key under `prefix`, recursively, in lexicographic order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Like [`ObjectStore::get`] but a missing key is `Ok(None)`
    async fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.exists(key).await? {
            self.get(key).await.map(Some)
        } else {
            Ok(None)
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<PutAck>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Human-readable location, e.g. `s3://datalake`
    fn location(&self) -> String;
}
