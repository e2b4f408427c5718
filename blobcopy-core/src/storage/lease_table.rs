use crate::{BlobCopyError, BlobHandle, LeaseDuration, LeaseId, LeaseToken, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct LeaseRecord {
    lease_id: LeaseId,
    expires_at: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Advisory exclusive leases keyed by blob location.
///
/// Expired leases count as free for new holders but are reported as
/// `InvalidLeaseState` to the holder that tries to release them.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<String, LeaseRecord>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(
        &mut self,
        handle: &BlobHandle,
        duration: LeaseDuration,
        now: DateTime<Utc>,
    ) -> Result<LeaseToken> {
        if let Some(active) = self.active(handle, now) {
            return Err(BlobCopyError::LeaseConflict(format!(
                "blob={} already leased (lease_id={})",
                handle, active.lease_id
            )));
        }

        let lease_id = LeaseId::generate();
        let token = LeaseToken::new(lease_id.clone(), handle.clone(), now, duration);
        self.leases.insert(
            handle.key(),
            LeaseRecord {
                lease_id,
                expires_at: token.expires_at(),
            },
        );

        Ok(token)
    }

    pub fn release(&mut self, token: &LeaseToken, now: DateTime<Utc>) -> Result<()> {
        let key = token.blob().key();
        let record = match self.leases.get(&key) {
            Some(record) if record.lease_id == *token.lease_id() => record.clone(),
            _ => {
                return Err(BlobCopyError::InvalidLeaseState(format!(
                    "lease_id={} is not active on blob={}",
                    token.lease_id(),
                    token.blob()
                )));
            }
        };

        self.leases.remove(&key);

        if record.is_expired(now) {
            return Err(BlobCopyError::InvalidLeaseState(format!(
                "lease_id={} on blob={} expired",
                token.lease_id(),
                token.blob()
            )));
        }

        Ok(())
    }

    /// Drop whatever lease is held on `handle`. Returns whether one existed.
    pub fn break_lease(&mut self, handle: &BlobHandle) -> bool {
        self.leases.remove(&handle.key()).is_some()
    }

    /// Check that a writer presenting `lease_id` may modify `handle`.
    pub fn check_write(
        &self,
        handle: &BlobHandle,
        lease_id: Option<&LeaseId>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match (self.active(handle, now), lease_id) {
            (None, None) => Ok(()),
            (None, Some(presented)) => Err(BlobCopyError::InvalidLeaseState(format!(
                "lease_id={} presented but blob={} is not leased",
                presented, handle
            ))),
            (Some(active), Some(presented)) if active.lease_id == *presented => Ok(()),
            (Some(active), _) => Err(BlobCopyError::LeaseConflict(format!(
                "blob={} is leased (lease_id={})",
                handle, active.lease_id
            ))),
        }
    }

    pub fn is_leased(&self, handle: &BlobHandle, now: DateTime<Utc>) -> bool {
        self.active(handle, now).is_some()
    }

    fn active(&self, handle: &BlobHandle, now: DateTime<Utc>) -> Option<&LeaseRecord> {
        self.leases
            .get(&handle.key())
            .filter(|record| !record.is_expired(now))
    }
}
