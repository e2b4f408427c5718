use crate::{CopyOperation, CopyStatus, Result, StorageClient};
use std::sync::Arc;

/// Issues status checks for copy operations and folds the raw signal into
/// the operation.
#[derive(Clone)]
pub struct CopyStatusMonitor {
    client: Arc<dyn StorageClient>,
}

impl CopyStatusMonitor {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self { client }
    }

    /// One status check. Terminal operations are returned as they are
    /// without contacting the service.
    pub async fn refresh(&self, operation: &mut CopyOperation) -> Result<CopyStatus> {
        if operation.is_terminal() {
            return Ok(operation.status());
        }

        let signal = self.client.get_copy_status(operation.id()).await?;
        if signal.status.is_none() {
            tracing::debug!(
                "copy status signal absent; treating as pending. copy_id={}",
                operation.id()
            );
        }

        let status = operation.apply_signal(&signal);
        tracing::debug!(
            "copy status refreshed. copy_id={} status={} progress={:?}",
            operation.id(),
            status,
            operation.progress()
        );

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CopyId, SimulatedStorage};
    use bytes::Bytes;

    async fn started(storage: &Arc<SimulatedStorage>) -> CopyOperation {
        let source = storage.get_blob_handle("source", "a").unwrap();
        let destination = storage.get_blob_handle("backup", "a").unwrap();
        storage
            .put_blob(&source, Bytes::from_static(b"abcdef"), None)
            .await
            .unwrap();
        let started = storage.start_copy(&source, &destination).await.unwrap();
        CopyOperation::new(started.id, source, destination, &started.signal)
    }

    #[tokio::test]
    async fn test_refresh_tolerates_absent_status() {
        let storage = Arc::new(
            SimulatedStorage::new("mem://acct")
                .with_copy_polls(1)
                .with_silent_polls(1),
        );
        let monitor = CopyStatusMonitor::new(storage.clone());
        let mut op = started(&storage).await;

        assert_eq!(monitor.refresh(&mut op).await.unwrap(), CopyStatus::Pending);
        assert_eq!(monitor.refresh(&mut op).await.unwrap(), CopyStatus::Success);
    }

    #[tokio::test]
    async fn test_refresh_after_terminal_does_not_call_service() {
        let storage = Arc::new(SimulatedStorage::new("mem://acct").with_copy_polls(1));
        let monitor = CopyStatusMonitor::new(storage.clone());
        let mut op = started(&storage).await;

        assert_eq!(monitor.refresh(&mut op).await.unwrap(), CopyStatus::Success);
        let calls = storage.stats().await.status_calls;

        for _ in 0..3 {
            assert_eq!(monitor.refresh(&mut op).await.unwrap(), CopyStatus::Success);
        }
        assert_eq!(storage.stats().await.status_calls, calls);
    }

    #[tokio::test]
    async fn test_refresh_unknown_copy_is_error() {
        let storage = Arc::new(SimulatedStorage::new("mem://acct"));
        let monitor = CopyStatusMonitor::new(storage.clone());
        let op = started(&storage).await;

        let mut orphan = CopyOperation::new(
            CopyId::new("missing"),
            op.source().clone(),
            op.destination().clone(),
            &crate::CopyStatusSignal::absent(),
        );
        assert!(monitor.refresh(&mut orphan).await.unwrap_err().is_not_found());
    }
}
