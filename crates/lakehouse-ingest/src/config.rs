//! Pipeline configuration
//!
//! Loaded from a TOML file (`lakehouse.toml`, or the path in
//! `LAKEHOUSE_CONFIG`) with `LAKEHOUSE__`-prefixed environment overrides,
//! e.g. `LAKEHOUSE__STORAGE__BACKEND=fs`. Object store credentials come
//! from [`StorageConfig::from_env`](crate::storage::StorageConfig::from_env).

use lakehouse_common::{ExtractionMode, LakeError, Result, SourceDescriptor, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{ApiEndpoint, LocalFileBatch, RelationalTable};
use crate::layout;

pub const DEFAULT_CONFIG_PATH: &str = "lakehouse.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3 or MinIO, configured from the environment
    #[default]
    S3,
    /// A local directory, mostly for development
    Fs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the `fs` backend
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Skip the bucket reachability check at startup
    #[serde(default)]
    pub skip_connection_check: bool,
}

/// A table to capture
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    /// Entity name in the raw layout
    pub entity: String,
    /// Table in the database; defaults to the entity name
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub mode: ExtractionMode,
    #[serde(default)]
    pub change_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationalConfig {
    pub name: String,
    /// Falls back to `DATABASE_URL`
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub entity: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    pub name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalFilesConfig {
    pub name: String,
    pub staging_dir: PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default = "default_true")]
    pub mark_processed: bool,
}

/// One configured source, tagged by `kind`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Relational(RelationalConfig),
    Api(ApiConfig),
    LocalFiles(LocalFilesConfig),
}

fn default_max_connections() -> u32 {
    4
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("schemas")
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Relational(c) => &c.name,
            SourceConfig::Api(c) => &c.name,
            SourceConfig::LocalFiles(c) => &c.name,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Relational(_) => SourceKind::Relational,
            SourceConfig::Api(_) => SourceKind::Api,
            SourceConfig::LocalFiles(_) => SourceKind::LocalFiles,
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.name();
        layout::validate_segment("source", name)?;

        let mut entities = HashSet::new();
        let mut check_entity = |entity: &str| -> Result<()> {
            layout::validate_segment("entity", entity)?;
            if !entities.insert(entity.to_string()) {
                return Err(LakeError::config(format!(
                    "source '{name}' lists entity '{entity}' twice"
                )));
            }
            Ok(())
        };

        match self {
            SourceConfig::Relational(c) => {
                if c.tables.is_empty() {
                    return Err(LakeError::config(format!("source '{name}' has no tables")));
                }
                for table in &c.tables {
                    check_entity(&table.entity)?;
                    if table.mode == ExtractionMode::Incremental && table.change_column.is_none() {
                        return Err(LakeError::config(format!(
                            "{name}/{}: incremental mode needs change_column",
                            table.entity
                        )));
                    }
                }
            }
            SourceConfig::Api(c) => {
                if c.endpoints.is_empty() {
                    return Err(LakeError::config(format!("source '{name}' has no endpoints")));
                }
                if c.timeout_secs == 0 {
                    return Err(LakeError::config(format!("source '{name}': timeout_secs must be > 0")));
                }
                for endpoint in &c.endpoints {
                    check_entity(&endpoint.entity)?;
                    if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                        return Err(LakeError::config(format!(
                            "{name}/{}: url must be http(s), got '{}'",
                            endpoint.entity, endpoint.url
                        )));
                    }
                }
            }
            SourceConfig::LocalFiles(c) => {
                globset::Glob::new(&c.pattern).map_err(|e| {
                    LakeError::config(format!("source '{name}': invalid pattern '{}': {e}", c.pattern))
                })?;
            }
        }
        Ok(())
    }
}

impl RelationalConfig {
    pub fn database_url(&self) -> Result<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| {
                LakeError::config(format!(
                    "source '{}' needs database_url or DATABASE_URL",
                    self.name
                ))
            })
    }

    pub fn tables(&self) -> Vec<RelationalTable> {
        self.tables
            .iter()
            .map(|t| RelationalTable {
                descriptor: SourceDescriptor::new(
                    &self.name,
                    &t.entity,
                    SourceKind::Relational,
                    t.mode,
                ),
                table: t.table.clone().unwrap_or_else(|| t.entity.clone()),
                change_column: t.change_column.clone(),
            })
            .collect()
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn endpoints(&self) -> Vec<ApiEndpoint> {
        self.endpoints
            .iter()
            .map(|e| ApiEndpoint {
                descriptor: SourceDescriptor::new(
                    &self.name,
                    &e.entity,
                    SourceKind::Api,
                    ExtractionMode::Full,
                ),
                url: e.url.clone(),
            })
            .collect()
    }
}

impl LocalFilesConfig {
    pub fn batch(&self) -> LocalFileBatch {
        LocalFileBatch {
            source: self.name.clone(),
            staging_dir: self.staging_dir.clone(),
            pattern: self.pattern.clone(),
            mark_processed: self.mark_processed,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Directory holding `<dataset>.toml` schema documents
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage: StorageSection::default(),
            sources: Vec::new(),
            schema_dir: default_schema_dir(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, else `LAKEHOUSE_CONFIG`, else `lakehouse.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("LAKEHOUSE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(true))
            .add_source(config::Environment::with_prefix("LAKEHOUSE").separator("__"))
            .build()
            .map_err(|e| LakeError::config(format!("{}: {e}", path.display())))?;

        Self::from_settings(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .map_err(|e| LakeError::config(e.to_string()))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let config: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| LakeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::Fs && self.storage.root.is_none() {
            return Err(LakeError::config("storage.backend = \"fs\" needs storage.root"));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name()) {
                return Err(LakeError::config(format!(
                    "source '{}' is defined twice",
                    source.name()
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| LakeError::config(format!("unknown source '{name}'")))
    }

    pub fn schema_path(&self, dataset: &str) -> PathBuf {
        self.schema_dir.join(format!("{dataset}.toml"))
    }
}
