use crate::{BlobCopyError, BlobHandle, CopyBlobRequest, LeaseDuration, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller-supplied knobs for one copy flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `None` leases the source until it is released.
    #[serde(default)]
    pub lease_duration_secs: Option<u64>,
    #[serde(default)]
    pub abort_if_pending: bool,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            lease_duration_secs: None,
            abort_if_pending: false,
        }
    }
}

impl CopySettings {
    pub fn request(&self, source: BlobHandle, destination: BlobHandle) -> Result<CopyBlobRequest> {
        if self.poll_interval_ms == 0 {
            return Err(BlobCopyError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(CopyBlobRequest {
            source,
            destination,
            lease_duration: LeaseDuration::from_secs(self.lease_duration_secs)?,
            abort_if_pending: self.abort_if_pending,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}
