use super::{CopyStarted, LeaseTable, StorageClient};
use crate::{
    BlobCopyError, BlobHandle, BlobProperties, CopyId, CopyProgress, CopyStatus,
    CopyStatusSignal, LeaseDuration, LeaseId, LeaseToken, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use ulid::Ulid;

struct CopyTask {
    status: CopyStatus,
    total_bytes: u64,
    abort_handle: Option<AbortHandle>,
}

/// [`StorageClient`] over an `object_store` backend.
///
/// Copies run `ObjectStore::copy` on a background task so the caller can
/// poll and abort them. A copy is forgotten once a final status has been
/// reported for it. Leases are advisory and only visible to clients sharing
/// this instance.
pub struct ObjectStoreClient {
    account_endpoint: String,
    store: Arc<dyn ObjectStore>,
    leases: Mutex<LeaseTable>,
    copies: Arc<Mutex<HashMap<String, CopyTask>>>,
}

impl ObjectStoreClient {
    pub fn new(account_endpoint: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            account_endpoint: account_endpoint.into(),
            store,
            leases: Mutex::new(LeaseTable::new()),
            copies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_memory(account_endpoint: impl Into<String>) -> Self {
        Self::new(account_endpoint, Arc::new(InMemory::new()))
    }

    /// Copies started and not yet reported as final.
    pub async fn tracked_copies(&self) -> usize {
        self.copies.lock().await.len()
    }

    async fn head(&self, handle: &BlobHandle) -> Result<object_store::ObjectMeta> {
        self.store
            .head(&object_path(handle))
            .await
            .map_err(|error| match error {
                object_store::Error::NotFound { .. } => {
                    BlobCopyError::NotFound(format!("blob={}", handle))
                }
                other => BlobCopyError::from(other),
            })
    }
}

fn object_path(handle: &BlobHandle) -> Path {
    Path::from(handle.key())
}

fn properties_of(meta: &object_store::ObjectMeta) -> BlobProperties {
    BlobProperties {
        size_bytes: meta.size as u64,
        etag: meta.e_tag.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl StorageClient for ObjectStoreClient {
    fn account_endpoint(&self) -> &str {
        &self.account_endpoint
    }

    async fn acquire_lease(
        &self,
        handle: &BlobHandle,
        duration: LeaseDuration,
    ) -> Result<LeaseToken> {
        self.head(handle).await?;
        let mut leases = self.leases.lock().await;
        leases.acquire(handle, duration, Utc::now())
    }

    async fn release_lease(&self, token: &LeaseToken) -> Result<()> {
        let mut leases = self.leases.lock().await;
        leases.release(token, Utc::now())
    }

    async fn start_copy(
        &self,
        source: &BlobHandle,
        destination: &BlobHandle,
    ) -> Result<CopyStarted> {
        let source_meta = self.head(source).await?;
        self.leases
            .lock()
            .await
            .check_write(destination, None, Utc::now())?;

        let id = CopyId::new(Ulid::new().to_string());
        let total_bytes = source_meta.size as u64;

        let mut copies = self.copies.lock().await;
        let store = Arc::clone(&self.store);
        let task_copies = Arc::clone(&self.copies);
        let task_id = id.clone();
        let from = object_path(source);
        let to = object_path(destination);

        let join = tokio::spawn(async move {
            let result = store.copy(&from, &to).await;
            let mut copies = task_copies.lock().await;
            let Some(task) = copies.get_mut(task_id.as_str()) else {
                return;
            };
            if task.status != CopyStatus::Pending {
                return;
            }

            task.abort_handle = None;
            task.status = match result {
                Ok(()) => CopyStatus::Success,
                Err(error) => {
                    tracing::warn!(
                        "object store copy failed. copy_id={} from={} to={} error={}",
                        task_id,
                        from,
                        to,
                        error
                    );
                    CopyStatus::Failed
                }
            };
        });

        copies.insert(
            id.as_str().to_string(),
            CopyTask {
                status: CopyStatus::Pending,
                total_bytes,
                abort_handle: Some(join.abort_handle()),
            },
        );

        let signal = CopyStatusSignal::new(
            Some(CopyStatus::Pending.as_str()),
            Some(CopyProgress {
                copied_bytes: 0,
                total_bytes,
            }),
        );

        Ok(CopyStarted { id, signal })
    }

    async fn get_copy_status(&self, id: &CopyId) -> Result<CopyStatusSignal> {
        let mut copies = self.copies.lock().await;
        let task = copies
            .get(id.as_str())
            .ok_or_else(|| BlobCopyError::NotFound(format!("copy_id={}", id)))?;

        let copied_bytes = if task.status == CopyStatus::Success {
            task.total_bytes
        } else {
            0
        };

        let signal = CopyStatusSignal::new(
            Some(task.status.as_str()),
            Some(CopyProgress {
                copied_bytes,
                total_bytes: task.total_bytes,
            }),
        );
        if task.status.is_terminal() {
            copies.remove(id.as_str());
        }

        Ok(signal)
    }

    async fn abort_copy(&self, id: &CopyId) -> Result<()> {
        let mut copies = self.copies.lock().await;
        let task = copies
            .get_mut(id.as_str())
            .ok_or_else(|| BlobCopyError::NoPendingCopy(format!("copy_id={}", id)))?;

        if task.status != CopyStatus::Pending {
            return Err(BlobCopyError::NoPendingCopy(format!(
                "copy_id={} status={}",
                id, task.status
            )));
        }

        if let Some(handle) = task.abort_handle.take() {
            handle.abort();
        }
        task.status = CopyStatus::Aborted;
        Ok(())
    }

    async fn put_blob(
        &self,
        handle: &BlobHandle,
        body: Bytes,
        lease_id: Option<&LeaseId>,
    ) -> Result<BlobProperties> {
        // Held across the put so no lease can be granted between the check
        // and the write. Lease calls on this client wait for the upload.
        let leases = self.leases.lock().await;
        leases.check_write(handle, lease_id, Utc::now())?;

        let size_bytes = body.len() as u64;
        let result = self
            .store
            .put(&object_path(handle), PutPayload::from(body))
            .await?;

        Ok(BlobProperties {
            size_bytes,
            etag: result.e_tag.unwrap_or_default(),
        })
    }

    async fn blob_properties(&self, handle: &BlobHandle) -> Result<BlobProperties> {
        let meta = self.head(handle).await?;
        Ok(properties_of(&meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpret;
    use object_store::local::LocalFileSystem;

    async fn wait_signal(client: &ObjectStoreClient, id: &CopyId) -> CopyStatusSignal {
        let mut signal = CopyStatusSignal::absent();
        for _ in 0..200 {
            signal = client.get_copy_status(id).await.unwrap();
            if interpret(signal.status.as_deref()).is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        signal
    }

    async fn wait_terminal(client: &ObjectStoreClient, id: &CopyId) -> CopyStatus {
        interpret(wait_signal(client, id).await.status.as_deref())
    }

    #[tokio::test]
    async fn test_in_memory_copy_succeeds() {
        let client = ObjectStoreClient::in_memory("mem://acct");
        let source = client.get_blob_handle("source", "report.csv").unwrap();
        let destination = client.get_blob_handle("backup", "report.csv").unwrap();
        client
            .put_blob(&source, Bytes::from_static(b"a,b,c\n1,2,3\n"), None)
            .await
            .unwrap();

        let started = client.start_copy(&source, &destination).await.unwrap();
        assert_eq!(started.signal.status.as_deref(), Some("pending"));

        let signal = wait_signal(&client, &started.id).await;
        assert_eq!(signal.status.as_deref(), Some("success"));
        assert_eq!(signal.progress.as_deref(), Some("12/12"));
        let copied = client.blob_properties(&destination).await.unwrap();
        assert_eq!(copied.size_bytes, 12);
    }

    #[tokio::test]
    async fn test_reported_copies_are_forgotten() {
        let client = Arc::new(ObjectStoreClient::in_memory("mem://acct"));
        let orchestrator = crate::CopyOrchestrator::new(client.clone());
        let source = client.get_blob_handle("source", "shared.bin").unwrap();
        client
            .put_blob(&source, Bytes::from(vec![3u8; 256]), None)
            .await
            .unwrap();

        for i in 0..20 {
            let destination = client
                .get_blob_handle("backup", &format!("copy-{}.bin", i))
                .unwrap();
            let mut request = crate::CopyBlobRequest::new(source.clone(), destination);
            request.poll_interval = std::time::Duration::from_millis(5);
            let result = orchestrator.run(request).await.unwrap();
            assert!(result.succeeded());
        }

        assert_eq!(client.tracked_copies().await, 0);
        assert!(
            client
                .get_copy_status(&CopyId::new("never-started"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_local_filesystem_copy_and_lease() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap();
        let client = ObjectStoreClient::new("file://local", Arc::new(store));
        let source = client.get_blob_handle("source", "dir/blob.bin").unwrap();
        let destination = client.get_blob_handle("backup", "dir/blob.bin").unwrap();
        client
            .put_blob(&source, Bytes::from(vec![1u8; 4096]), None)
            .await
            .unwrap();

        let token = client
            .acquire_lease(&source, LeaseDuration::Infinite)
            .await
            .unwrap();
        assert!(
            client
                .acquire_lease(&source, LeaseDuration::Infinite)
                .await
                .unwrap_err()
                .is_lease_conflict()
        );
        assert!(
            client
                .put_blob(&source, Bytes::from_static(b"x"), None)
                .await
                .unwrap_err()
                .is_lease_conflict()
        );

        let started = client.start_copy(&source, &destination).await.unwrap();
        assert_eq!(wait_terminal(&client, &started.id).await, CopyStatus::Success);
        assert_eq!(
            client.blob_properties(&destination).await.unwrap().size_bytes,
            4096
        );

        client.release_lease(&token).await.unwrap();
        assert!(
            client
                .release_lease(&token)
                .await
                .unwrap_err()
                .is_invalid_lease_state()
        );
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let client = ObjectStoreClient::in_memory("mem://acct");
        let source = client.get_blob_handle("source", "ghost").unwrap();
        let destination = client.get_blob_handle("backup", "ghost").unwrap();

        assert!(
            client
                .acquire_lease(&source, LeaseDuration::Infinite)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            client
                .start_copy(&source, &destination)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_abort_after_completion_is_rejected() {
        let client = ObjectStoreClient::in_memory("mem://acct");
        let source = client.get_blob_handle("source", "small").unwrap();
        let destination = client.get_blob_handle("backup", "small").unwrap();
        client
            .put_blob(&source, Bytes::from_static(b"tiny"), None)
            .await
            .unwrap();

        let started = client.start_copy(&source, &destination).await.unwrap();
        assert_eq!(wait_terminal(&client, &started.id).await, CopyStatus::Success);

        let err = client.abort_copy(&started.id).await.unwrap_err();
        assert!(matches!(err, BlobCopyError::NoPendingCopy(_)));
    }
}
