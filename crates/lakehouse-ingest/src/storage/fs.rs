use async_trait::async_trait;
use lakehouse_common::{checksum::sha256_hex, LakeError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use super::{ObjectStore, PutAck};

const TEMP_SUFFIX: &str = ".partial";

/// Object store backed by a local directory.
///
/// Writes go to a hidden temporary sibling and are renamed into place, so a
/// reader never observes a half-written object.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(LakeError::storage(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

async fn write_then_rename(temp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(temp, data).await?;
    tokio::fs::rename(temp, path).await
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let wanted = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(|e| LakeError::storage(e.to_string()))?;
                if !entry.file_type().is_file() || is_temp_file(entry.path()) {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&wanted) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| LakeError::storage(format!("listing task failed: {e}")))??;

        debug!("Found {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| LakeError::storage(format!("failed to read {}: {e}", path.display())))
    }

    async fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LakeError::storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    #[instrument(skip(self, data, _content_type))]
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<PutAck> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| LakeError::storage(format!("invalid object key '{key}'")))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LakeError::storage(format!("invalid object key '{key}'")))?;
        let temp = parent.join(format!(".{file_name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()));

        let checksum = sha256_hex(&data);
        let size = data.len() as u64;

        if let Err(e) = write_then_rename(&temp, &path, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(LakeError::storage(format!(
                "failed to write {}: {e}",
                path.display()
            )));
        }

        debug!("Wrote {} bytes to {}", size, path.display());

        Ok(PutAck {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
