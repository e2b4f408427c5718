use super::{CopyStarted, LeaseTable, StorageClient, compute_etag};
use crate::{
    BlobCopyError, BlobHandle, BlobProperties, CopyId, CopyProgress, CopyStatus,
    CopyStatusSignal, LeaseDuration, LeaseId, LeaseToken, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

/// Call counters recorded by [`SimulatedStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub acquire_calls: u32,
    pub release_calls: u32,
    pub start_copy_calls: u32,
    pub status_calls: u32,
    pub abort_calls: u32,
}

#[derive(Debug, Clone, Default)]
struct SimulatedBehavior {
    copy_polls: u32,
    silent_polls: u32,
    start_failure: Option<String>,
    abort_failure: Option<String>,
    status_failure: Option<(u32, String)>,
    copies_fail: bool,
}

struct StoredBlob {
    body: Bytes,
    etag: String,
}

struct SimulatedCopy {
    destination: BlobHandle,
    body: Bytes,
    status: CopyStatus,
    polls_seen: u32,
    polls_done: u32,
}

#[derive(Default)]
struct SimulatedState {
    blobs: HashMap<String, StoredBlob>,
    leases: LeaseTable,
    copies: HashMap<String, SimulatedCopy>,
    stats: SimulatedStats,
}

/// In-memory storage account with scripted copy progression.
///
/// A started copy stays pending for `copy_polls` status checks and then
/// completes, writing the destination. The first `silent_polls` checks of
/// each copy report no status at all.
pub struct SimulatedStorage {
    account_endpoint: String,
    behavior: SimulatedBehavior,
    state: Mutex<SimulatedState>,
}

impl SimulatedStorage {
    pub fn new(account_endpoint: impl Into<String>) -> Self {
        Self {
            account_endpoint: account_endpoint.into(),
            behavior: SimulatedBehavior::default(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Number of status checks a copy stays pending. Zero completes copies
    /// synchronously on start.
    pub fn with_copy_polls(mut self, polls: u32) -> Self {
        self.behavior.copy_polls = polls;
        self
    }

    pub fn with_silent_polls(mut self, polls: u32) -> Self {
        self.behavior.silent_polls = polls;
        self
    }

    pub fn with_start_failure(mut self, message: impl Into<String>) -> Self {
        self.behavior.start_failure = Some(message.into());
        self
    }

    pub fn with_abort_failure(mut self, message: impl Into<String>) -> Self {
        self.behavior.abort_failure = Some(message.into());
        self
    }

    /// Status checks after the first `after` succeed fail with `Transport`.
    pub fn with_status_failure(mut self, after: u32, message: impl Into<String>) -> Self {
        self.behavior.status_failure = Some((after, message.into()));
        self
    }

    /// Copies end in `failed` instead of `success`.
    pub fn with_failing_copies(mut self) -> Self {
        self.behavior.copies_fail = true;
        self
    }

    pub async fn stats(&self) -> SimulatedStats {
        self.state.lock().await.stats
    }

    pub async fn is_leased(&self, handle: &BlobHandle) -> bool {
        self.state.lock().await.leases.is_leased(handle, Utc::now())
    }

    /// Break the lease on `handle`, as another client with break rights would.
    pub async fn break_lease(&self, handle: &BlobHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.leases.break_lease(handle) {
            return Err(BlobCopyError::InvalidLeaseState(format!(
                "blob={} has no lease to break",
                handle
            )));
        }
        Ok(())
    }

    /// Copies still tracked, i.e. started and not yet reported as final.
    pub async fn tracked_copies(&self) -> usize {
        self.state.lock().await.copies.len()
    }

    pub async fn blob_bytes(&self, handle: &BlobHandle) -> Option<Bytes> {
        let state = self.state.lock().await;
        state.blobs.get(&handle.key()).map(|blob| blob.body.clone())
    }

    fn completion_status(&self) -> CopyStatus {
        if self.behavior.copies_fail {
            CopyStatus::Failed
        } else {
            CopyStatus::Success
        }
    }
}

fn store_blob(blobs: &mut HashMap<String, StoredBlob>, key: String, body: Bytes) -> BlobProperties {
    let etag = compute_etag(&body);
    let properties = BlobProperties {
        size_bytes: body.len() as u64,
        etag: etag.clone(),
    };
    blobs.insert(key, StoredBlob { body, etag });
    properties
}

fn progress_of(copy: &SimulatedCopy, total_polls: u32) -> CopyProgress {
    let total_bytes = copy.body.len() as u64;
    let copied_bytes = match copy.status {
        CopyStatus::Success => total_bytes,
        _ if total_polls == 0 => 0,
        _ => total_bytes * u64::from(copy.polls_done) / u64::from(total_polls),
    };

    CopyProgress {
        copied_bytes,
        total_bytes,
    }
}

#[async_trait]
impl StorageClient for SimulatedStorage {
    fn account_endpoint(&self) -> &str {
        &self.account_endpoint
    }

    async fn acquire_lease(
        &self,
        handle: &BlobHandle,
        duration: LeaseDuration,
    ) -> Result<LeaseToken> {
        let mut state = self.state.lock().await;
        state.stats.acquire_calls += 1;

        if !state.blobs.contains_key(&handle.key()) {
            return Err(BlobCopyError::NotFound(format!("blob={}", handle)));
        }

        state.leases.acquire(handle, duration, Utc::now())
    }

    async fn release_lease(&self, token: &LeaseToken) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stats.release_calls += 1;
        state.leases.release(token, Utc::now())
    }

    async fn start_copy(
        &self,
        source: &BlobHandle,
        destination: &BlobHandle,
    ) -> Result<CopyStarted> {
        let mut state = self.state.lock().await;
        state.stats.start_copy_calls += 1;

        if let Some(message) = &self.behavior.start_failure {
            return Err(BlobCopyError::Transport(message.clone()));
        }

        let body = state
            .blobs
            .get(&source.key())
            .map(|blob| blob.body.clone())
            .ok_or_else(|| BlobCopyError::NotFound(format!("blob={}", source)))?;

        state.leases.check_write(destination, None, Utc::now())?;

        let id = CopyId::new(Ulid::new().to_string());
        let mut copy = SimulatedCopy {
            destination: destination.clone(),
            body,
            status: CopyStatus::Pending,
            polls_seen: 0,
            polls_done: 0,
        };

        if self.behavior.copy_polls == 0 {
            copy.status = self.completion_status();
            if copy.status == CopyStatus::Success {
                store_blob(&mut state.blobs, destination.key(), copy.body.clone());
            }
        }

        let signal = CopyStatusSignal::new(
            Some(copy.status.as_str()),
            Some(progress_of(&copy, self.behavior.copy_polls)),
        );
        if !copy.status.is_terminal() {
            state.copies.insert(id.as_str().to_string(), copy);
        }

        Ok(CopyStarted { id, signal })
    }

    async fn get_copy_status(&self, id: &CopyId) -> Result<CopyStatusSignal> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.stats.status_calls += 1;

        if let Some((after, message)) = &self.behavior.status_failure {
            if state.stats.status_calls > *after {
                return Err(BlobCopyError::Transport(message.clone()));
            }
        }

        let copy = state
            .copies
            .get_mut(id.as_str())
            .ok_or_else(|| BlobCopyError::NotFound(format!("copy_id={}", id)))?;

        copy.polls_seen += 1;
        if copy.polls_seen <= self.behavior.silent_polls {
            return Ok(CopyStatusSignal::absent());
        }

        if copy.status == CopyStatus::Pending {
            copy.polls_done += 1;
            if copy.polls_done >= self.behavior.copy_polls {
                copy.status = self.completion_status();
                if copy.status == CopyStatus::Success {
                    store_blob(&mut state.blobs, copy.destination.key(), copy.body.clone());
                }
            }
        }

        let signal = CopyStatusSignal::new(
            Some(copy.status.as_str()),
            Some(progress_of(copy, self.behavior.copy_polls)),
        );
        if copy.status.is_terminal() {
            state.copies.remove(id.as_str());
        }

        Ok(signal)
    }

    async fn abort_copy(&self, id: &CopyId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stats.abort_calls += 1;

        if let Some(message) = &self.behavior.abort_failure {
            return Err(BlobCopyError::Transport(message.clone()));
        }

        let copy = state
            .copies
            .get_mut(id.as_str())
            .ok_or_else(|| BlobCopyError::NoPendingCopy(format!("copy_id={}", id)))?;

        if copy.status != CopyStatus::Pending {
            return Err(BlobCopyError::NoPendingCopy(format!(
                "copy_id={} status={}",
                id, copy.status
            )));
        }

        copy.status = CopyStatus::Aborted;
        Ok(())
    }

    async fn put_blob(
        &self,
        handle: &BlobHandle,
        body: Bytes,
        lease_id: Option<&LeaseId>,
    ) -> Result<BlobProperties> {
        let mut state = self.state.lock().await;
        state.leases.check_write(handle, lease_id, Utc::now())?;
        Ok(store_blob(&mut state.blobs, handle.key(), body))
    }

    async fn blob_properties(&self, handle: &BlobHandle) -> Result<BlobProperties> {
        let state = self.state.lock().await;
        state
            .blobs
            .get(&handle.key())
            .map(|blob| BlobProperties {
                size_bytes: blob.body.len() as u64,
                etag: blob.etag.clone(),
            })
            .ok_or_else(|| BlobCopyError::NotFound(format!("blob={}", handle)))
    }
}
