use async_trait::async_trait;
use lakehouse_common::{checksum::sha256_hex, LakeError, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{ObjectStore, PutAck};

/// In-process object store for tests and dry runs.
///
/// Writes to keys under a prefix registered with
/// [`MemoryStore::fail_writes_under`] are rejected, which lets callers
/// exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Stored>>,
    failing_prefixes: RwLock<Vec<String>>,
}

#[derive(Debug, Clone)]
struct Stored {
    data: Vec<u8>,
    content_type: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_writes_under(&self, prefix: impl Into<String>) {
        self.failing_prefixes.write().await.push(prefix.into());
    }

    pub async fn clear_failures(&self) {
        self.failing_prefixes.write().await.clear();
    }

    /// Content type recorded with the last write of `key`
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|s| s.content_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|s| s.data.clone())
            .ok_or_else(|| LakeError::storage(format!("no such key: {key}")))
    }

    async fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).map(|s| s.data.clone()))
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<PutAck> {
        if self
            .failing_prefixes
            .read()
            .await
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
        {
            return Err(LakeError::storage(format!("injected write failure for {key}")));
        }

        let ack = PutAck {
            key: key.to_string(),
            checksum: sha256_hex(&data),
            size: data.len() as u64,
        };
        self.objects.write().await.insert(
            key.to_string(),
            Stored {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(ack)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
