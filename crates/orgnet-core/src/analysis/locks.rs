//! Advisory per-organization run lock.
//!
//! Score write-backs are last-write-wins, so two overlapping runs for one
//! organization would interleave their stages. Runs for different
//! organizations never contend.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{OrgNetError, OrgNetResult};

#[derive(Debug, Default)]
pub struct RunLocks {
    active: Mutex<HashSet<String>>,
}

impl RunLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the organization for one run. Fails with `RunInProgress` when
    /// another run holds it; the claim is released when the guard drops.
    pub fn acquire(self: &Arc<Self>, organization_id: &str) -> OrgNetResult<RunGuard> {
        let mut active = self.active.lock();
        if !active.insert(organization_id.to_string()) {
            return Err(OrgNetError::RunInProgress(organization_id.to_string()));
        }
        Ok(RunGuard {
            locks: Arc::clone(self),
            organization_id: organization_id.to_string(),
        })
    }

    pub fn is_running(&self, organization_id: &str) -> bool {
        self.active.lock().contains(organization_id)
    }
}

#[derive(Debug)]
pub struct RunGuard {
    locks: Arc<RunLocks>,
    organization_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.organization_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_for_same_org_is_rejected() {
        let locks = RunLocks::new();
        let guard = locks.acquire("acme").unwrap();
        assert!(matches!(
            locks.acquire("acme"),
            Err(OrgNetError::RunInProgress(org)) if org == "acme"
        ));
        let _other = locks.acquire("globex").unwrap();
        drop(guard);
        assert!(!locks.is_running("acme"));
        assert!(locks.acquire("acme").is_ok());
    }

    #[test]
    fn contention_across_threads() {
        let locks = RunLocks::new();
        let guard = locks.acquire("acme").unwrap();
        let remote = Arc::clone(&locks);
        let handle = std::thread::spawn(move || remote.acquire("acme").is_err());
        assert!(handle.join().unwrap());
        drop(guard);
    }
}
