//! Distributed lock over the shared store.
//!
//! - **Acquire**: one atomic set-if-absent with TTL, storing a fresh owner
//!   token. There is never a separate existence check.
//! - **Release**: one atomic compare-and-delete against that token, so a
//!   holder whose TTL already lapsed cannot delete a newer holder's lock.
//! - **TTL**: the only deadlock escape for crashed holders. Leases are not
//!   extended; pick a TTL with margin over the critical section.
//!
//! No queuing, no fairness, no reentrancy.
//!
//! # Example
//!
//! ```rust,ignore
//! let lock = DistributedLock::new(store.clone());
//!
//! if let Some(guard) = lock.try_lock(&lock_key("order", user_id), Duration::from_secs(10))? {
//!     // critical section
//!     guard.release()?; // or just drop it
//! }
//! ```

use std::fmt::Display;
use std::time::Duration;

use ulid::Ulid;

use crate::error::Result;
use crate::store::SharedStore;

/// Key for the lock guarding `<resource>:<id>`: `lock:<resource>:<id>`
pub fn lock_key(resource: &str, id: impl Display) -> String {
    format!("lock:{}:{}", resource, id)
}

/// Proof of a successful acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    owner_token: String,
    ttl: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value stored under the key while this handle owns it
    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Rebuild a handle from a token obtained elsewhere (e.g. the CLI)
    pub fn from_parts(key: impl Into<String>, owner_token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner_token: owner_token.into(),
            ttl,
        }
    }
}

/// TTL-bounded exclusive lock on the shared store
#[derive(Clone)]
pub struct DistributedLock {
    store: SharedStore,

    /// Identifies this lock client in owner tokens
    holder_id: String,
}

impl DistributedLock {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            holder_id: Ulid::new().to_string(),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Try once to take `key` for `ttl`
    ///
    /// Every call mints a new owner token, so two callers sharing this
    /// client still cannot release each other's locks.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let owner_token = format!("{}:{}", self.holder_id, Ulid::new());

        if self.store.set_if_absent(key, owner_token.as_bytes(), ttl)? {
            tracing::trace!("Acquired {} as {}", key, owner_token);
            Ok(Some(LockHandle {
                key: key.to_string(),
                owner_token,
                ttl,
            }))
        } else {
            tracing::trace!("{} is held by someone else", key);
            Ok(None)
        }
    }

    /// Release a lock if `handle` still owns it
    ///
    /// Returns false when the lock had expired or now belongs to another
    /// owner; in that case nothing is deleted.
    pub fn release(&self, handle: &LockHandle) -> Result<bool> {
        let released = self
            .store
            .delete_if_equals(&handle.key, handle.owner_token.as_bytes())?;

        if !released {
            tracing::debug!(
                "Lock {} no longer owned by {} at release",
                handle.key,
                handle.owner_token
            );
        }
        Ok(released)
    }

    /// `try_acquire` returning a guard that releases on drop
    pub fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        Ok(self.try_acquire(key, ttl)?.map(|handle| LockGuard {
            lock: self.clone(),
            handle: Some(handle),
        }))
    }
}

/// Held lock that is released on every exit path, panics included
pub struct LockGuard {
    lock: DistributedLock,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    /// Release now and report whether we still owned the lock
    pub fn release(mut self) -> Result<bool> {
        match self.handle.take() {
            Some(handle) => self.lock.release(&handle),
            None => Ok(false),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.lock.release(&handle) {
                // TTL will reclaim it
                tracing::warn!("Failed to release {}: {}", handle.key, e);
            }
        }
    }
}
