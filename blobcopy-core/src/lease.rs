use crate::{BlobCopyError, BlobHandle, Result, StorageClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const MIN_FINITE_LEASE: Duration = Duration::from_secs(15);
pub const MAX_FINITE_LEASE: Duration = Duration::from_secs(60);

/// How long a lease is held before the service lets it expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseDuration {
    Infinite,
    Finite(Duration),
}

impl LeaseDuration {
    /// A finite lease; the service accepts 15 to 60 seconds.
    pub fn finite(duration: Duration) -> Result<Self> {
        if duration < MIN_FINITE_LEASE || duration > MAX_FINITE_LEASE {
            return Err(BlobCopyError::InvalidRequest(format!(
                "lease duration must be between {}s and {}s, got {}s",
                MIN_FINITE_LEASE.as_secs(),
                MAX_FINITE_LEASE.as_secs(),
                duration.as_secs()
            )));
        }
        Ok(Self::Finite(duration))
    }

    pub fn from_secs(secs: Option<u64>) -> Result<Self> {
        match secs {
            None => Ok(Self::Infinite),
            Some(secs) => Self::finite(Duration::from_secs(secs)),
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    pub fn expires_at(&self, acquired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Infinite => None,
            Self::Finite(duration) => chrono::Duration::from_std(*duration)
                .ok()
                .map(|duration| acquired_at + duration),
        }
    }
}

impl fmt::Display for LeaseDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => f.write_str("infinite"),
            Self::Finite(duration) => write!(f, "{}s", duration.as_secs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An active exclusive lease on one blob.
///
/// Tokens are not `Clone`: each one belongs to exactly one holder.
#[derive(Debug)]
pub struct LeaseToken {
    lease_id: LeaseId,
    blob: BlobHandle,
    acquired_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl LeaseToken {
    pub fn new(
        lease_id: LeaseId,
        blob: BlobHandle,
        acquired_at: DateTime<Utc>,
        duration: LeaseDuration,
    ) -> Self {
        Self {
            lease_id,
            blob,
            acquired_at,
            expires_at: duration.expires_at(acquired_at),
        }
    }

    pub fn lease_id(&self) -> &LeaseId {
        &self.lease_id
    }

    pub fn blob(&self) -> &BlobHandle {
        &self.blob
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// How the lease release at the end of a scoped section went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LeaseRelease {
    Released,
    /// The service no longer considered the lease valid (expired or broken).
    InvalidState(String),
}

/// Holds a lease on a source blob and releases it on every exit path.
///
/// Call [`LeaseGuard::release`] on the normal path. A guard dropped without
/// being released (early return, error, cancelled future) spawns the release
/// on the current tokio runtime. That release runs after the drop returns, so
/// a caller observing lease state right after cancelling must yield to the
/// runtime first.
pub struct LeaseGuard {
    client: Arc<dyn StorageClient>,
    token: Arc<LeaseToken>,
    released: bool,
}

impl LeaseGuard {
    pub async fn acquire(
        client: Arc<dyn StorageClient>,
        handle: &BlobHandle,
        duration: LeaseDuration,
    ) -> Result<Self> {
        let token = client.acquire_lease(handle, duration).await?;
        tracing::info!(
            "lease acquired. blob={} lease_id={} duration={}",
            handle,
            token.lease_id(),
            duration
        );

        Ok(Self {
            client,
            token: Arc::new(token),
            released: false,
        })
    }

    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    pub fn lease_id(&self) -> &LeaseId {
        self.token.lease_id()
    }

    /// Release the lease. A failed release is not retried on drop.
    pub async fn release(mut self) -> Result<()> {
        let result = self.client.release_lease(&self.token).await;
        self.released = true;
        result?;

        tracing::info!(
            "lease released. blob={} lease_id={}",
            self.token.blob(),
            self.token.lease_id()
        );
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let token = Arc::clone(&self.token);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "lease guard dropped outside a runtime; lease left to expire. blob={} lease_id={}",
                token.blob(),
                token.lease_id()
            );
            return;
        };

        tracing::warn!(
            "lease guard dropped before release; releasing in background. blob={} lease_id={}",
            token.blob(),
            token.lease_id()
        );

        let client = Arc::clone(&self.client);
        runtime.spawn(async move {
            match client.release_lease(&token).await {
                Ok(()) => tracing::info!(
                    "lease released. blob={} lease_id={}",
                    token.blob(),
                    token.lease_id()
                ),
                Err(error) => tracing::warn!(
                    "background lease release failed. blob={} lease_id={} error={}",
                    token.blob(),
                    token.lease_id(),
                    error
                ),
            }
        });
    }
}

/// Run `section` while holding a lease on `handle`.
///
/// The lease is released whether `section` succeeds, fails or is cancelled.
/// A failure of `section` wins over a release failure. If `section` succeeded
/// and the service reports the lease as no longer valid, the value is still
/// returned together with [`LeaseRelease::InvalidState`].
pub async fn with_lease<F, Fut, T>(
    client: Arc<dyn StorageClient>,
    handle: &BlobHandle,
    duration: LeaseDuration,
    section: F,
) -> Result<(T, LeaseRelease)>
where
    F: FnOnce(LeaseId) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let guard = LeaseGuard::acquire(client, handle, duration).await?;
    let lease_id = guard.lease_id().clone();

    let outcome = section(lease_id).await;
    let release = guard.release().await;

    match (outcome, release) {
        (Ok(value), Ok(())) => Ok((value, LeaseRelease::Released)),
        (Ok(value), Err(BlobCopyError::InvalidLeaseState(reason))) => {
            tracing::warn!(
                "lease was no longer valid at release. blob={} reason={}",
                handle,
                reason
            );
            Ok((value, LeaseRelease::InvalidState(reason)))
        }
        (Ok(_), Err(error)) => Err(error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(release_error)) => {
            tracing::warn!(
                "lease release failed after section error. blob={} error={}",
                handle,
                release_error
            );
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedStorage;
    use bytes::Bytes;

    async fn seeded() -> (Arc<SimulatedStorage>, BlobHandle) {
        let storage = Arc::new(SimulatedStorage::new("mem://acct"));
        let handle = storage.get_blob_handle("source", "blob.bin").unwrap();
        storage
            .put_blob(&handle, Bytes::from_static(b"payload"), None)
            .await
            .unwrap();
        (storage, handle)
    }

    #[test]
    fn test_finite_duration_bounds() {
        assert!(LeaseDuration::finite(Duration::from_secs(14)).is_err());
        assert!(LeaseDuration::finite(Duration::from_secs(15)).is_ok());
        assert!(LeaseDuration::finite(Duration::from_secs(60)).is_ok());
        assert!(LeaseDuration::finite(Duration::from_secs(61)).is_err());
        assert_eq!(LeaseDuration::from_secs(None).unwrap(), LeaseDuration::Infinite);
    }

    #[test]
    fn test_infinite_lease_never_expires() {
        let handle = BlobHandle::new("mem://acct", "source", "blob").unwrap();
        let now = Utc::now();
        let token = LeaseToken::new(LeaseId::generate(), handle, now, LeaseDuration::Infinite);
        assert!(token.expires_at().is_none());
        assert!(!token.is_expired(now + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_finite_lease_expiry() {
        let handle = BlobHandle::new("mem://acct", "source", "blob").unwrap();
        let now = Utc::now();
        let duration = LeaseDuration::finite(Duration::from_secs(30)).unwrap();
        let token = LeaseToken::new(LeaseId::generate(), handle, now, duration);
        assert!(!token.is_expired(now + chrono::Duration::seconds(29)));
        assert!(token.is_expired(now + chrono::Duration::seconds(30)));
    }

    #[tokio::test]
    async fn test_guard_release_is_counted_once() {
        let (storage, handle) = seeded().await;
        let guard = LeaseGuard::acquire(storage.clone(), &handle, LeaseDuration::Infinite)
            .await
            .unwrap();
        assert_eq!(guard.lease_id(), guard.token().lease_id());
        assert_eq!(guard.token().blob(), &handle);

        guard.release().await.unwrap();

        let stats = storage.stats().await;
        assert_eq!(stats.acquire_calls, 1);
        assert_eq!(stats.release_calls, 1);
        assert!(!storage.is_leased(&handle).await);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let (storage, handle) = seeded().await;
        {
            let _guard = LeaseGuard::acquire(storage.clone(), &handle, LeaseDuration::Infinite)
                .await
                .unwrap();
            assert!(storage.is_leased(&handle).await);
        }

        for _ in 0..10 {
            if !storage.is_leased(&handle).await {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!storage.is_leased(&handle).await);
        assert_eq!(storage.stats().await.release_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_release_is_not_repeated_on_drop() {
        let (storage, handle) = seeded().await;
        let guard = LeaseGuard::acquire(storage.clone(), &handle, LeaseDuration::Infinite)
            .await
            .unwrap();
        storage.break_lease(&handle).await.unwrap();

        let err = guard.release().await.unwrap_err();
        assert!(err.is_invalid_lease_state());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(storage.stats().await.release_calls, 1);
    }

    #[tokio::test]
    async fn test_with_lease_releases_after_section_error() {
        let (storage, handle) = seeded().await;

        let result: Result<((), LeaseRelease)> =
            with_lease(storage.clone(), &handle, LeaseDuration::Infinite, |_| async {
                Err::<(), _>(BlobCopyError::Transport("boom".to_string()))
            })
            .await;

        assert!(matches!(result, Err(BlobCopyError::Transport(_))));
        let stats = storage.stats().await;
        assert_eq!(stats.acquire_calls, 1);
        assert_eq!(stats.release_calls, 1);
        assert!(!storage.is_leased(&handle).await);
    }

    #[tokio::test]
    async fn test_with_lease_conflict_skips_section_and_release() {
        let (storage, handle) = seeded().await;
        let holder = storage
            .acquire_lease(&handle, LeaseDuration::Infinite)
            .await
            .unwrap();

        let mut ran = false;
        let result = with_lease(storage.clone(), &handle, LeaseDuration::Infinite, |_| {
            ran = true;
            async { Ok::<(), BlobCopyError>(()) }
        })
        .await;

        assert!(matches!(result, Err(BlobCopyError::LeaseConflict(_))));
        assert!(!ran);
        assert_eq!(storage.stats().await.release_calls, 0);

        storage.release_lease(&holder).await.unwrap();
    }

    #[tokio::test]
    async fn test_with_lease_reports_invalid_state_without_failing() {
        let (storage, handle) = seeded().await;

        let (value, release) = with_lease(
            storage.clone(),
            &handle,
            LeaseDuration::Infinite,
            |lease_id| {
                let storage = storage.clone();
                let handle = handle.clone();
                async move {
                    storage.break_lease(&handle).await?;
                    Ok::<_, BlobCopyError>(lease_id)
                }
            },
        )
        .await
        .unwrap();

        assert!(!value.as_str().is_empty());
        assert!(matches!(release, LeaseRelease::InvalidState(_)));
        assert_eq!(storage.stats().await.release_calls, 1);
    }
}
