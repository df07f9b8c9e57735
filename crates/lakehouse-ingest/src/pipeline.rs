//! Wires configuration to the capture and refinement stages

use lakehouse_common::{LakeError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::capture::{
    ApiCapture, CaptureReport, Clock, LocalFileCapture, RelationalCapture, SystemClock,
};
use crate::checkpoint::{CheckpointDocument, CheckpointStore};
use crate::config::{PipelineConfig, SourceConfig, StorageBackend, StorageSection};
use crate::normalize::{DatasetSchema, NormalizeResult, Normalizer};
use crate::source::{PgSource, ReqwestSource};
use crate::storage::{FsStore, ObjectStore, S3Store, StorageConfig};

/// Open the configured object store. S3 stores are checked for
/// reachability unless `skip_connection_check` is set.
pub async fn open_store(storage: &StorageSection) -> Result<Arc<dyn ObjectStore>> {
    match storage.backend {
        StorageBackend::S3 => {
            let store = S3Store::new(StorageConfig::from_env()?).await?;
            if !storage.skip_connection_check {
                store.check_connection().await?;
            }
            Ok(Arc::new(store))
        }
        StorageBackend::Fs => {
            let root = storage
                .root
                .clone()
                .ok_or_else(|| LakeError::config("storage.backend = \"fs\" needs storage.root"))?;
            Ok(Arc::new(FsStore::new(root)))
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        Self { config, store, clock }
    }

    pub async fn connect(config: PipelineConfig) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        info!("Using object store {}", store.location());
        Ok(Self::new(config, store, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Capture every entity of `source`, or just `entity`
    #[instrument(skip(self))]
    pub async fn capture(&self, source: &str, entity: Option<&str>) -> Result<CaptureReport> {
        let source_config = self.config.source(source)?;
        info!("Capturing {} source '{}'", source_config.kind(), source);

        match source_config {
            SourceConfig::Relational(c) => {
                let tables = only(c.tables(), entity, |t| &t.descriptor.entity)?;
                let pg = PgSource::connect(&c.name, &c.database_url()?, c.max_connections).await?;
                let capture = RelationalCapture::new(
                    self.store.clone(),
                    Arc::new(pg.clone()),
                    self.clock.clone(),
                );
                let report = capture.capture_all(&c.name, &tables).await;
                pg.close().await;
                report
            }
            SourceConfig::Api(c) => {
                let endpoints = only(c.endpoints(), entity, |e| &e.descriptor.entity)?;
                let http = ReqwestSource::new(c.timeout())?;
                let capture = ApiCapture::new(self.store.clone(), Arc::new(http), self.clock.clone());
                Ok(capture.capture_all(&c.name, &endpoints).await)
            }
            SourceConfig::LocalFiles(c) => {
                if entity.is_some() {
                    return Err(LakeError::config(
                        "--entity is not supported for local_files sources; entities come from file names",
                    ));
                }
                LocalFileCapture::new(self.store.clone(), self.clock.clone())
                    .capture_all(&c.batch())
                    .await
            }
        }
    }

    /// Refine `dataset` using `<schema_dir>/<dataset>.toml`
    #[instrument(skip(self))]
    pub async fn normalize(&self, dataset: &str) -> Result<NormalizeResult> {
        let schema = DatasetSchema::load(self.config.schema_path(dataset))?;
        if schema.dataset != dataset {
            return Err(LakeError::invalid_schema(format!(
                "{} declares dataset '{}'",
                self.config.schema_path(dataset).display(),
                schema.dataset
            )));
        }
        Normalizer::new(self.store.clone(), self.clock.clone())
            .normalize(&schema)
            .await
    }

    /// Current watermarks of `source`
    pub async fn watermarks(&self, source: &str) -> Result<CheckpointDocument> {
        self.config.source(source)?;
        CheckpointStore::new(self.store.clone()).load(source).await
    }
}

fn only<T, F>(items: Vec<T>, entity: Option<&str>, name: F) -> Result<Vec<T>>
where
    F: Fn(&T) -> &String,
{
    let Some(wanted) = entity else {
        return Ok(items);
    };
    let selected: Vec<T> = items.into_iter().filter(|item| name(item) == wanted).collect();
    if selected.is_empty() {
        return Err(LakeError::config(format!("unknown entity '{wanted}'")));
    }
    Ok(selected)
}
