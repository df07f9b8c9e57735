//! Per-entity watermarks for incremental capture
//!
//! One JSON document per source, at
//! `bronze/<source>/_checkpoint/data_atualizacao.json`, mapping entity name
//! to its watermark. The whole document is rewritten on every update.
//! Concurrent runs against the same source are not supported; the last
//! writer wins.

use lakehouse_common::{LakeError, Result, Watermark};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::layout;
use crate::storage::{ObjectStore, CONTENT_TYPE_JSON};

/// Entity name to watermark
pub type CheckpointDocument = BTreeMap<String, Watermark>;

#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The full document for `source`; empty when none was ever written
    #[instrument(skip(self))]
    pub async fn load(&self, source: &str) -> Result<CheckpointDocument> {
        let key = layout::checkpoint_key(source);
        match self.store.get_opt(&key).await? {
            None => {
                debug!("No checkpoint at {}", key);
                Ok(CheckpointDocument::new())
            }
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| LakeError::corrupt_checkpoint(key, e)),
        }
    }

    /// `None` means the entity has never been captured incrementally
    pub async fn read_watermark(&self, source: &str, entity: &str) -> Result<Option<Watermark>> {
        Ok(self.load(source).await?.remove(entity))
    }

    /// Persist `value` for `entity` unless it would move the watermark
    /// backwards. Returns the watermark in effect afterwards.
    #[instrument(skip(self))]
    pub async fn write_watermark(
        &self,
        source: &str,
        entity: &str,
        value: &Watermark,
    ) -> Result<Watermark> {
        let mut document = self.load(source).await?;

        if let Some(current) = document.get(entity) {
            if !value.is_after(current)? {
                if value != current {
                    warn!(
                        "Refusing to move watermark of {}/{} back from {} to {}",
                        source, entity, current, value
                    );
                }
                return Ok(current.clone());
            }
        }

        document.insert(entity.to_string(), value.clone());
        let body = serde_json::to_vec_pretty(&document)?;
        self.store
            .put(&layout::checkpoint_key(source), body, CONTENT_TYPE_JSON)
            .await?;

        info!("Watermark of {}/{} advanced to {}", source, entity, value);
        Ok(value.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn store() -> (Arc<MemoryStore>, CheckpointStore) {
        let memory = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(memory.clone());
        (memory, checkpoints)
    }

    #[tokio::test]
    async fn test_absent_document_reads_as_none() {
        let (_, checkpoints) = store();
        assert_eq!(checkpoints.read_watermark("erp", "orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read_keeps_other_entities() {
        let (memory, checkpoints) = store();
        let ts = Watermark::Timestamp(Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap());

        checkpoints.write_watermark("erp", "orders", &ts).await.unwrap();
        checkpoints
            .write_watermark("erp", "customers", &Watermark::Version(12))
            .await
            .unwrap();

        assert_eq!(checkpoints.read_watermark("erp", "orders").await.unwrap(), Some(ts));

        let raw = memory.get(&layout::checkpoint_key("erp")).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["orders"], "2025-01-02T10:00:00Z");
        assert_eq!(json["customers"], 12);
    }

    #[tokio::test]
    async fn test_never_moves_backwards() {
        let (_, checkpoints) = store();
        checkpoints
            .write_watermark("erp", "orders", &Watermark::Version(10))
            .await
            .unwrap();

        let kept = checkpoints
            .write_watermark("erp", "orders", &Watermark::Version(3))
            .await
            .unwrap();

        assert_eq!(kept, Watermark::Version(10));
        assert_eq!(
            checkpoints.read_watermark("erp", "orders").await.unwrap(),
            Some(Watermark::Version(10))
        );
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let (memory, checkpoints) = store();
        memory
            .put(&layout::checkpoint_key("erp"), b"{\"orders\": ".to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();

        let err = checkpoints.read_watermark("erp", "orders").await.unwrap_err();
        assert!(matches!(err, LakeError::CorruptCheckpoint { .. }));

        // A well-formed document with a value that is not a watermark is corrupt too.
        memory
            .put(&layout::checkpoint_key("erp"), b"{\"orders\": [1]}".to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        let err = checkpoints
            .write_watermark("erp", "orders", &Watermark::Version(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LakeError::CorruptCheckpoint { .. }));
    }

    proptest! {
        #[test]
        fn prop_watermark_is_monotonic(writes in proptest::collection::vec(any::<i64>(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, checkpoints) = store();
                let mut high = i64::MIN;
                for v in writes {
                    checkpoints.write_watermark("s", "e", &Watermark::Version(v)).await.unwrap();
                    high = high.max(v);
                    let now = checkpoints.read_watermark("s", "e").await.unwrap();
                    assert_eq!(now, Some(Watermark::Version(high)));
                }
            });
        }
    }
}
