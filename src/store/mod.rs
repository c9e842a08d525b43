//! Store Module
//!
//! The shared key/value store every caller of the cache, lock and id
//! generator talks to.
//!
//! ## Responsibilities
//! - Plain get/set/delete with optional native TTL
//! - Atomic set-if-absent (lock acquire)
//! - Atomic compare-and-delete (lock release)
//! - Atomic increment (identifier counters)
//!
//! ## Implementations
//! - `MemoryStore`: in-process, `RwLock<HashMap>` with lazy expiry.
//!   Also what the TCP server serves.
//! - `RemoteStore`: TCP client against a running `flashsale-store`.
//!
//! All cache state is disposable: losing the store costs latency, never
//! correctness.

mod memory;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{Command, Response};

pub use memory::MemoryStore;
pub use remote::RemoteStore;

/// Shared handle to any store implementation
pub type SharedStore = Arc<dyn KvStore>;

/// Operations the core needs from the shared store.
///
/// Every method is a single atomic step against the store. Callers never
/// compose check-then-act sequences out of them.
pub trait KvStore: Send + Sync {
    /// Get a live value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite a value, optionally with a native TTL
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Store `value` only if no live value exists. Returns whether it was stored.
    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Remove a key. Returns whether a live value was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove a key only if its live value equals `expected`
    fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Increment an integer counter, creating it at 0 first if missing
    fn incr(&self, key: &str) -> Result<i64>;

    /// Health check
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn flag(value: bool) -> Option<Vec<u8>> {
    Some(vec![value as u8])
}

/// Execute one wire command against a store
///
/// Store errors become ERROR responses so a bad request never tears down
/// the connection.
pub fn execute(store: &dyn KvStore, command: Command) -> Response {
    let result = match command {
        Command::Get { key } => {
            let key = match String::from_utf8(key) {
                Ok(k) => k,
                Err(_) => return Response::error("key is not valid UTF-8"),
            };
            return match store.get(&key) {
                Ok(Some(value)) => Response::ok(Some(value)),
                Ok(None) => Response::not_found(),
                Err(e) => Response::error(&e.to_string()),
            };
        }
        Command::Set { key, value, ttl_ms } => with_key(key, |k| {
            store.set(k, &value, ttl_from_ms(ttl_ms)).map(|_| None)
        }),
        Command::Delete { key } => with_key(key, |k| store.delete(k).map(flag)),
        Command::Ping => store.ping().map(|_| Some(b"PONG".to_vec())),
        Command::SetIfAbsent { key, value, ttl_ms } => with_key(key, |k| {
            let ttl = ttl_from_ms(ttl_ms).unwrap_or(Duration::MAX);
            store.set_if_absent(k, &value, ttl).map(flag)
        }),
        Command::DeleteIfEquals { key, expected } => {
            with_key(key, |k| store.delete_if_equals(k, &expected).map(flag))
        }
        Command::Incr { key } => {
            with_key(key, |k| store.incr(k).map(|n| Some(n.to_be_bytes().to_vec())))
        }
    };

    match result {
        Ok(payload) => Response::ok(payload),
        Err(e) => Response::error(&e.to_string()),
    }
}

fn with_key<F>(key: Vec<u8>, op: F) -> Result<Option<Vec<u8>>>
where
    F: FnOnce(&str) -> Result<Option<Vec<u8>>>,
{
    let key = String::from_utf8(key).map_err(|_| {
        crate::FlashError::Protocol("key is not valid UTF-8".to_string())
    })?;
    op(&key)
}

/// 0 on the wire means "no native TTL"
pub(crate) fn ttl_from_ms(ttl_ms: u64) -> Option<Duration> {
    if ttl_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ttl_ms))
    }
}

pub(crate) fn ttl_to_ms(ttl: Option<Duration>) -> u64 {
    match ttl {
        // Sub-millisecond TTLs round up so they never turn into "no TTL"
        Some(ttl) => u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1),
        None => 0,
    }
}
