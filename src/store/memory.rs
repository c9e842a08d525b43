//! In-memory store
//!
//! HashMap-based store with RwLock for concurrency and lazy TTL expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{FlashError, Result};
use super::KvStore;

/// A stored value and its native deadline
#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            // An overflowing deadline is as good as none
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-process shared store
///
/// ## Concurrency:
/// - `data`: one RwLock; reads share it, every mutation takes it exclusively
///   so set-if-absent, compare-and-delete and incr are each a single
///   critical section
/// - Expired slots are invisible to all operations and reclaimed lazily
///   (on overwrite, on `purge_expired`)
pub struct MemoryStore {
    data: RwLock<HashMap<String, Slot>>,

    /// Approximate size in bytes (keys + values), including expired slots
    size: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Number of live entries
    pub fn entry_count(&self) -> usize {
        let now = Instant::now();
        self.data.read().values().filter(|s| s.is_live(now)).count()
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Check if there are no live entries
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Remaining native TTL of a live key (`None` if absent or persistent)
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let data = self.data.read();
        let slot = data.get(key).filter(|s| s.is_live(now))?;
        slot.expires_at.map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Drop every expired slot. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.write();
        let before = data.len();
        let mut freed = 0;
        data.retain(|key, slot| {
            let live = slot.is_live(now);
            if !live {
                freed += key.len() + slot.value.len();
            }
            live
        });
        self.size.fetch_sub(freed, Ordering::Relaxed);
        before - data.len()
    }

    /// Remove everything (simulates losing the whole cache)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::Relaxed);
    }

    /// Insert under an already held write lock, keeping `size` in step
    fn insert_locked(&self, data: &mut HashMap<String, Slot>, key: &str, slot: Slot) {
        let added = key.len() + slot.value.len();
        match data.insert(key.to_string(), slot) {
            Some(old) => {
                let removed = key.len() + old.value.len();
                if added >= removed {
                    self.size.fetch_add(added - removed, Ordering::Relaxed);
                } else {
                    self.size.fetch_sub(removed - added, Ordering::Relaxed);
                }
            }
            None => {
                self.size.fetch_add(added, Ordering::Relaxed);
            }
        }
    }

    fn remove_locked(&self, data: &mut HashMap<String, Slot>, key: &str) -> Option<Slot> {
        let slot = data.remove(key)?;
        self.size
            .fetch_sub(key.len() + slot.value.len(), Ordering::Relaxed);
        Some(slot)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let data = self.data.read();
        Ok(data
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, Slot::new(value.to_vec(), ttl));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut data = self.data.write();

        if data.get(key).is_some_and(|slot| slot.is_live(now)) {
            return Ok(false);
        }

        self.insert_locked(&mut data, key, Slot::new(value.to_vec(), Some(ttl)));
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut data = self.data.write();
        Ok(self
            .remove_locked(&mut data, key)
            .is_some_and(|slot| slot.is_live(now)))
    }

    fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = Instant::now();
        let mut data = self.data.write();

        let matches = data
            .get(key)
            .is_some_and(|slot| slot.is_live(now) && slot.value == expected);
        if matches {
            self.remove_locked(&mut data, key);
        }
        Ok(matches)
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut data = self.data.write();

        let (current, expires_at) = match data.get(key).filter(|s| s.is_live(now)) {
            Some(slot) => {
                let text = std::str::from_utf8(&slot.value).map_err(|_| {
                    FlashError::Protocol(format!("value at {} is not an integer", key))
                })?;
                let n = text.parse::<i64>().map_err(|_| {
                    FlashError::Protocol(format!("value at {} is not an integer", key))
                })?;
                (n, slot.expires_at)
            }
            None => (0, None),
        };

        let next = current.checked_add(1).ok_or_else(|| {
            FlashError::Protocol(format!("increment of {} would overflow", key))
        })?;

        let slot = Slot {
            value: next.to_string().into_bytes(),
            expires_at,
        };
        self.insert_locked(&mut data, key, slot);
        Ok(next)
    }
}
