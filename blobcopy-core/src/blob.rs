use crate::{BlobCopyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_BLOB_NAME_LEN: usize = 1024;

/// Identifies one blob: storage account endpoint, container and blob name.
///
/// Handles are validated on construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BlobHandle {
    account_endpoint: String,
    container: String,
    name: String,
}

/// Size and entity tag of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub size_bytes: u64,
    pub etag: String,
}

impl BlobHandle {
    pub fn new(
        account_endpoint: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let account_endpoint = normalize_endpoint(&account_endpoint.into())?;
        let container = container.into();
        validate_container_name(&container)?;
        let name = normalize_blob_name(&name.into())?;

        Ok(Self {
            account_endpoint,
            container,
            name,
        })
    }

    pub fn account_endpoint(&self) -> &str {
        &self.account_endpoint
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of the blob inside its account, `container/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }

    pub fn url(&self) -> String {
        format!("{}/{}/{}", self.account_endpoint, self.container, self.name)
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Split a `container/path/to/blob` string into container and blob name.
pub fn split_blob_path(path: &str) -> Result<(String, String)> {
    let trimmed = path.trim().trim_matches('/');
    let Some((container, name)) = trimmed.split_once('/') else {
        return Err(BlobCopyError::InvalidRequest(format!(
            "blob path must look like container/name: {}",
            path
        )));
    };

    validate_container_name(container)?;
    let name = normalize_blob_name(name)?;
    Ok((container.to_string(), name))
}

fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(BlobCopyError::InvalidRequest(
            "account endpoint cannot be empty".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

fn validate_container_name(container: &str) -> Result<()> {
    let len = container.len();
    if !(3..=63).contains(&len) {
        return Err(BlobCopyError::InvalidRequest(format!(
            "container name must be 3-63 characters: {}",
            container
        )));
    }

    let valid_chars = container
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let edges_ok = container.starts_with(|c: char| c.is_ascii_alphanumeric())
        && container.ends_with(|c: char| c.is_ascii_alphanumeric());

    if !valid_chars || !edges_ok || container.contains("--") {
        return Err(BlobCopyError::InvalidRequest(format!(
            "invalid container name: {}",
            container
        )));
    }

    Ok(())
}

fn normalize_blob_name(name: &str) -> Result<String> {
    let trimmed = name.trim_matches('/');
    if trimmed.is_empty() {
        return Err(BlobCopyError::InvalidRequest(
            "blob name cannot be empty".to_string(),
        ));
    }

    let mut components = Vec::new();
    for component in trimmed.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(BlobCopyError::InvalidRequest(format!(
                "invalid blob name component: {}",
                component
            )));
        }
        components.push(component);
    }

    let normalized = components.join("/");
    if normalized.chars().count() > MAX_BLOB_NAME_LEN {
        return Err(BlobCopyError::InvalidRequest(format!(
            "blob name exceeds {} characters",
            MAX_BLOB_NAME_LEN
        )));
    }

    Ok(normalized)
}
