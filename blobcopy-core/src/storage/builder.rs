use super::{ObjectStoreClient, SimulatedStorage, StorageClient};
use crate::{BlobCopyError, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StorageClientBuilder {
    backend: Option<String>,
    account_endpoint: Option<String>,
    local_root: Option<PathBuf>,
    s3_bucket: Option<String>,
    s3_region: Option<String>,
    simulated_copy_polls: Option<u32>,
}

impl StorageClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn account_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.account_endpoint = Some(endpoint.into());
        self
    }

    pub fn local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    pub fn s3_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.s3_bucket = Some(bucket.into());
        self
    }

    pub fn s3_region(mut self, region: impl Into<String>) -> Self {
        self.s3_region = Some(region.into());
        self
    }

    pub fn simulated_copy_polls(mut self, polls: u32) -> Self {
        self.simulated_copy_polls = Some(polls);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(BlobCopyError::Config(
                "storage backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    fn endpoint_or(&self, fallback: String) -> String {
        self.account_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or(fallback)
    }

    pub fn build(&self) -> Result<Arc<dyn StorageClient>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "memory" => {
                let endpoint = self.endpoint_or("memory://account".to_string());
                Ok(Arc::new(ObjectStoreClient::in_memory(endpoint)))
            }
            "local" => {
                let root = self.local_root.clone().ok_or_else(|| {
                    BlobCopyError::Config("local root is required for local backend".to_string())
                })?;

                std::fs::create_dir_all(&root)?;
                let store = LocalFileSystem::new_with_prefix(&root).map_err(|error| {
                    BlobCopyError::Config(format!(
                        "failed to open local store at {}: {}",
                        root.display(),
                        error
                    ))
                })?;

                let endpoint = self.endpoint_or(format!("file://{}", root.display()));
                Ok(Arc::new(ObjectStoreClient::new(endpoint, Arc::new(store))))
            }
            "s3" => {
                let bucket = self.s3_bucket.as_deref().unwrap_or_default().trim();
                if bucket.is_empty() {
                    return Err(BlobCopyError::Config(
                        "s3 bucket is required for s3 backend".to_string(),
                    ));
                }

                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = self.s3_region.as_deref() {
                    builder = builder.with_region(region);
                }

                let store = builder.build().map_err(|error| {
                    BlobCopyError::Config(format!("failed to build s3 store: {}", error))
                })?;

                let endpoint = self.endpoint_or(format!("s3://{}", bucket));
                Ok(Arc::new(ObjectStoreClient::new(endpoint, Arc::new(store))))
            }
            "simulated" => {
                let endpoint = self.endpoint_or("sim://account".to_string());
                let storage = SimulatedStorage::new(endpoint)
                    .with_copy_polls(self.simulated_copy_polls.unwrap_or(0));
                Ok(Arc::new(storage))
            }
            other => Err(BlobCopyError::Config(format!(
                "unsupported storage backend '{}': expected memory | local | s3 | simulated",
                other
            ))),
        }
    }
}
