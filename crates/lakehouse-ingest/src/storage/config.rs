use lakehouse_common::{LakeError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Connection settings for the S3-compatible object store.
///
/// Read from the environment only so that secrets never land in
/// `lakehouse.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl StorageConfig {
    /// `MINIO_*` names win over `S3_*`, which win over the AWS defaults.
    ///
    /// `MINIO_ENDPOINT` may be a bare `host:port`; `MINIO_SECURE` then picks
    /// the scheme.
    pub fn from_env() -> Result<Self> {
        let secure = env_bool("MINIO_SECURE")?.unwrap_or(false);

        let endpoint = first_env(&["MINIO_ENDPOINT", "S3_ENDPOINT"]).map(|endpoint| {
            if endpoint.contains("://") {
                endpoint
            } else if secure {
                format!("https://{endpoint}")
            } else {
                format!("http://{endpoint}")
            }
        });

        // Path-style addressing is the only thing MinIO understands.
        let path_style = env_bool("S3_PATH_STYLE")?.unwrap_or(endpoint.is_some());

        // A custom endpoint without keys is a stock MinIO; plain S3 without
        // keys uses the AWS credential chain.
        let default_key = || endpoint.as_ref().map(|_| "minioadmin".to_string());
        let access_key = first_env(&["MINIO_ACCESS_KEY", "S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"])
            .or_else(default_key);
        let secret_key = first_env(&["MINIO_SECRET_KEY", "S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"])
            .or_else(default_key);

        Ok(Self {
            region: first_env(&["S3_REGION", "AWS_REGION"])
                .unwrap_or_else(|| "us-east-1".to_string()),
            bucket: first_env(&["DL_BUCKET", "S3_BUCKET"])
                .unwrap_or_else(|| "datalake".to_string()),
            access_key,
            secret_key,
            endpoint,
            path_style,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    /// Static credentials, when both halves are present
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.trim().is_empty()))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            other => Err(LakeError::config(format!(
                "{name} must be a boolean, got '{other}'"
            ))),
        },
        Err(_) => Ok(None),
    }
}
