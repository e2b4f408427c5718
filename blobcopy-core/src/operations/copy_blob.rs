use crate::{
    BlobCopyError, BlobHandle, CopyOperation, CopyStatus, CopyStatusMonitor, LeaseDuration,
    LeaseRelease, Result, StorageClient, with_lease,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Drives the lifecycle of leased server-side copies.
#[derive(Clone)]
pub struct CopyOrchestrator {
    client: Arc<dyn StorageClient>,
    monitor: CopyStatusMonitor,
}

#[derive(Debug, Clone)]
pub struct CopyBlobRequest {
    pub source: BlobHandle,
    pub destination: BlobHandle,
    pub lease_duration: LeaseDuration,
    /// Run the one-shot abort check right after the copy starts.
    pub abort_if_pending: bool,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl CopyBlobRequest {
    pub fn new(source: BlobHandle, destination: BlobHandle) -> Self {
        Self {
            source,
            destination,
            lease_duration: LeaseDuration::Infinite,
            abort_if_pending: false,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Result of waiting on a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum WaitOutcome {
    Completed(CopyStatus),
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyBlobResult {
    pub operation: CopyOperation,
    pub outcome: WaitOutcome,
    pub abort_issued: bool,
    pub lease_release: LeaseRelease,
}

impl CopyBlobResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == WaitOutcome::Completed(CopyStatus::Success)
    }
}

impl CopyOrchestrator {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        let monitor = CopyStatusMonitor::new(Arc::clone(&client));
        Self { client, monitor }
    }

    pub fn monitor(&self) -> &CopyStatusMonitor {
        &self.monitor
    }

    pub async fn start_copy(
        &self,
        source: &BlobHandle,
        destination: &BlobHandle,
    ) -> Result<CopyOperation> {
        ensure_distinct(source, destination)?;

        let started = self.client.start_copy(source, destination).await?;
        let operation =
            CopyOperation::new(started.id, source.clone(), destination.clone(), &started.signal);

        tracing::info!(
            "copy started. copy_id={} source={} destination={} status={}",
            operation.id(),
            source,
            destination,
            operation.status()
        );

        Ok(operation)
    }

    /// Refresh once and, if the copy is still pending, ask the service to
    /// abort it. Returns whether an abort was issued.
    ///
    /// The operation is not marked aborted locally; the next refresh observes
    /// the service's view.
    pub async fn maybe_abort(&self, operation: &mut CopyOperation) -> Result<bool> {
        let status = self.monitor.refresh(operation).await?;
        if status != CopyStatus::Pending {
            return Ok(false);
        }

        if let Err(error) = self.client.abort_copy(operation.id()).await {
            tracing::error!(
                "copy abort failed; copy may still be running. copy_id={} error={}",
                operation.id(),
                error
            );
            return Err(error);
        }

        tracing::info!("copy abort issued. copy_id={}", operation.id());
        Ok(true)
    }

    /// Poll until the copy reaches a terminal status or `timeout` elapses.
    ///
    /// Timing out is an outcome, not an error; the operation stays pending.
    /// A timeout too large to represent as an instant waits without a deadline.
    pub async fn wait_for_completion(
        &self,
        operation: &mut CopyOperation,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        ensure_poll_interval(poll_interval)?;

        let deadline = Instant::now().checked_add(timeout);
        let mut polls = 0u32;

        loop {
            if operation.is_terminal() {
                tracing::info!(
                    "copy finished. copy_id={} status={} polls={}",
                    operation.id(),
                    operation.status(),
                    polls
                );
                return Ok(WaitOutcome::Completed(operation.status()));
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => poll_interval,
            };
            if remaining.is_zero() {
                tracing::warn!(
                    "copy wait timed out. copy_id={} timeout_ms={} polls={}",
                    operation.id(),
                    timeout.as_millis(),
                    polls
                );
                return Ok(WaitOutcome::TimedOut);
            }

            tokio::time::sleep(poll_interval.min(remaining)).await;
            self.monitor.refresh(operation).await?;
            polls = polls.saturating_add(1);
        }
    }

    /// Lease the source, copy, optionally abort, wait, and release the lease.
    ///
    /// The lease is released on every exit path, including when the returned
    /// future is dropped before completion.
    pub async fn run(&self, request: CopyBlobRequest) -> Result<CopyBlobResult> {
        let CopyBlobRequest {
            source,
            destination,
            lease_duration,
            abort_if_pending,
            poll_interval,
            timeout,
        } = request;

        ensure_poll_interval(poll_interval)?;
        ensure_distinct(&source, &destination)?;

        let ((operation, outcome, abort_issued), lease_release) = with_lease(
            Arc::clone(&self.client),
            &source,
            lease_duration,
            |_lease_id| async {
                let mut operation = self.start_copy(&source, &destination).await?;

                let abort_issued = if abort_if_pending {
                    self.maybe_abort(&mut operation).await?
                } else {
                    false
                };

                let outcome = self
                    .wait_for_completion(&mut operation, poll_interval, timeout)
                    .await?;

                Ok::<_, BlobCopyError>((operation, outcome, abort_issued))
            },
        )
        .await?;

        Ok(CopyBlobResult {
            operation,
            outcome,
            abort_issued,
            lease_release,
        })
    }
}

fn ensure_distinct(source: &BlobHandle, destination: &BlobHandle) -> Result<()> {
    if source == destination {
        return Err(BlobCopyError::InvalidRequest(format!(
            "source and destination are the same blob: {}",
            source
        )));
    }
    Ok(())
}

fn ensure_poll_interval(poll_interval: Duration) -> Result<()> {
    if poll_interval.is_zero() {
        return Err(BlobCopyError::InvalidRequest(
            "poll interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
