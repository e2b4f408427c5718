//! Storage collaborators for Blobcopy
//!
//! The copy lifecycle only talks to storage through [`StorageClient`]. Two
//! implementations ship with the crate: a scripted in-memory simulator and an
//! adapter over any `object_store` backend.

pub mod builder;
pub mod lease_table;
pub mod object_backend;
pub mod simulated;

pub use builder::StorageClientBuilder;
pub use lease_table::LeaseTable;
pub use object_backend::ObjectStoreClient;
pub use simulated::{SimulatedStats, SimulatedStorage};

use crate::{
    BlobHandle, BlobProperties, CopyId, CopyStatusSignal, LeaseDuration, LeaseId, LeaseToken,
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Acknowledgement of a submitted server-side copy.
#[derive(Debug, Clone)]
pub struct CopyStarted {
    pub id: CopyId,
    pub signal: CopyStatusSignal,
}

/// Authenticated access to a blob storage account.
///
/// Every call may cross the network and is a suspension point.
#[async_trait]
pub trait StorageClient: Send + Sync {
    fn account_endpoint(&self) -> &str;

    fn get_blob_handle(&self, container: &str, name: &str) -> Result<BlobHandle> {
        BlobHandle::new(self.account_endpoint(), container, name)
    }

    /// Fails with `LeaseConflict` when another holder owns the lease and
    /// `NotFound` when the blob does not exist.
    async fn acquire_lease(&self, handle: &BlobHandle, duration: LeaseDuration)
    -> Result<LeaseToken>;

    /// Fails with `InvalidLeaseState` for a released, broken or expired lease.
    async fn release_lease(&self, token: &LeaseToken) -> Result<()>;

    async fn start_copy(&self, source: &BlobHandle, destination: &BlobHandle)
    -> Result<CopyStarted>;

    /// Implementations may forget a copy once they have reported a final
    /// status for it; later lookups then fail with `NotFound`.
    async fn get_copy_status(&self, id: &CopyId) -> Result<CopyStatusSignal>;

    /// Fails with `NoPendingCopy` when the copy already reached a final state
    /// or is no longer tracked.
    async fn abort_copy(&self, id: &CopyId) -> Result<()>;

    /// Writes are rejected with `LeaseConflict` while another holder leases
    /// the blob, unless `lease_id` names the active lease.
    async fn put_blob(
        &self,
        handle: &BlobHandle,
        body: Bytes,
        lease_id: Option<&LeaseId>,
    ) -> Result<BlobProperties>;

    async fn blob_properties(&self, handle: &BlobHandle) -> Result<BlobProperties>;
}

/// Compute the SHA256 entity tag of a blob body
pub fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
