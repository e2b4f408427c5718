//! Blobcopy Core - leased server-side blob copies
//!
//! Runs the full lifecycle of a copy between two blobs in one account:
//! - lease the source so it cannot change mid-copy
//! - start the copy on the storage service and poll its status
//! - optionally abort a copy that is still pending
//! - wait with a deadline, then release the lease on every exit path

pub mod blob;
pub mod error;
pub mod lease;
pub mod monitor;
pub mod operations;
pub mod settings;
pub mod status;
pub mod storage;

pub use blob::{BlobHandle, BlobProperties, split_blob_path};
pub use error::{BlobCopyError, Result};
pub use lease::{
    LeaseDuration, LeaseGuard, LeaseId, LeaseRelease, LeaseToken, MAX_FINITE_LEASE,
    MIN_FINITE_LEASE, with_lease,
};
pub use monitor::CopyStatusMonitor;
pub use operations::{CopyBlobRequest, CopyBlobResult, CopyOrchestrator, WaitOutcome};
pub use settings::CopySettings;
pub use status::{
    CopyId, CopyOperation, CopyProgress, CopyStatus, CopyStatusSignal, interpret,
};
pub use storage::{
    CopyStarted, LeaseTable, ObjectStoreClient, SimulatedStats, SimulatedStorage, StorageClient,
    StorageClientBuilder, compute_etag,
};
