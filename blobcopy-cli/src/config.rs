use blobcopy_core::{BlobCopyError, CopySettings, Result, StorageClientBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub copy: CopySettings,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub account_endpoint: Option<String>,
    pub local: Option<LocalConfig>,
    pub s3: Option<S3Config>,
    pub simulated: Option<SimulatedConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Local,
    S3,
    Simulated,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Local => "local",
            StorageBackend::S3 => "s3",
            StorageBackend::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_copy_polls")]
    pub copy_polls: u32,
}

fn default_copy_polls() -> u32 {
    3
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("BLOBCOPY").separator("__"))
            .build()
            .map_err(|e| BlobCopyError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| BlobCopyError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn storage_builder(&self) -> Result<StorageClientBuilder> {
        let storage = &self.storage;
        let mut builder = StorageClientBuilder::new().backend(storage.backend.as_str());

        if let Some(endpoint) = storage.account_endpoint.as_deref() {
            builder = builder.account_endpoint(endpoint);
        }

        match storage.backend {
            StorageBackend::Memory => {}
            StorageBackend::Local => {
                let local = storage.local.as_ref().ok_or_else(|| {
                    BlobCopyError::Config(
                        "local configuration is required for local backend".to_string(),
                    )
                })?;
                builder = builder.local_root(local.root.clone());
            }
            StorageBackend::S3 => {
                let s3 = storage.s3.as_ref().ok_or_else(|| {
                    BlobCopyError::Config(
                        "s3 configuration is required for s3 backend".to_string(),
                    )
                })?;
                builder = builder.s3_bucket(s3.bucket.clone());
                if let Some(region) = s3.region.as_deref() {
                    builder = builder.s3_region(region);
                }
            }
            StorageBackend::Simulated => {
                let copy_polls = storage
                    .simulated
                    .as_ref()
                    .map(|simulated| simulated.copy_polls)
                    .unwrap_or_else(default_copy_polls);
                builder = builder.simulated_copy_polls(copy_polls);
            }
        }

        Ok(builder)
    }
}
