//! Cache Module
//!
//! Cache-aside reads over the shared store, with three ways to survive
//! penetration and stampedes.
//!
//! ## Strategies
//! - `PassThrough`: negative caching only. Absent ids are remembered as an
//!   empty sentinel with a short TTL. Concurrent misses may all load.
//! - `Mutex`: a per-key rebuild lock serializes misses so only one caller
//!   loads; the others back off and retry, up to a fixed attempt cap.
//! - `LogicalExpire`: entries never expire in the store; an expiry embedded
//!   in the envelope triggers an async rebuild on the `RebuildPool` while
//!   readers keep getting the stale payload. Keys must be warmed first.
//!
//! ## Key Schema
//! ```text
//! cache:<kind>:<id>   payload, empty sentinel, or envelope
//! lock:<kind>:<id>    rebuild lock
//! ```

mod envelope;
mod pool;
mod engine;

pub use envelope::CachedEnvelope;
pub use pool::RebuildPool;
pub use engine::CacheAside;

use crate::record::Entity;

/// Which read path `CacheAside::read` uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    PassThrough,
    Mutex,
    LogicalExpire,
}

/// `cache:<kind>:<id>`
pub fn cache_key<T: Entity>(id: u64) -> String {
    format!("cache:{}:{}", T::KIND, id)
}
