//! # flashsale
//!
//! The concurrency-sensitive layer between request handlers and the system
//! of record of a shop/voucher service:
//! - Cache-aside reads with negative caching, mutex rebuilds, or logical
//!   expiration with async rebuilds
//! - A distributed lock with owner-verified, atomic release
//! - Flash-sale purchases with no oversell and one order per user
//! - Time-ordered 64-bit ids from a shared counter
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │        CacheAside        │        │   PurchaseCoordinator    │
//! │  (read / warm / update)  │        │       (purchase)         │
//! └──────┬─────────┬─────────┘        └──────┬─────────┬─────────┘
//!        │         │  RebuildPool            │         │
//!        │         ▼                         ▼         ▼
//!        │  ┌──────────────────┐   ┌────────────┐ ┌────────────┐
//!        │  │ DistributedLock  │◄──│ (per user) │ │IdGenerator │
//!        │  └────────┬─────────┘   └────────────┘ └─────┬──────┘
//!        │           │                                  │
//!        ▼           ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          KvStore  (MemoryStore / RemoteStore → TCP)         │
//! └─────────────────────────────────────────────────────────────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────────┐                ┌─────────────────┐
//! │  Repository<T>  │                │   OrderLedger   │
//! │ (load/persist)  │                │ (transactional) │
//! └─────────────────┘                └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod clock;

pub mod store;
pub mod protocol;
pub mod network;
pub mod lock;
pub mod id;
pub mod record;
pub mod cache;
pub mod seckill;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FlashError, Result};
pub use config::Config;
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{KvStore, MemoryStore, RemoteStore, SharedStore};
pub use lock::{lock_key, DistributedLock, LockGuard, LockHandle};
pub use id::{IdGenerator, Identifier};
pub use record::{Entity, MemoryRepository, Repository, Shop};
pub use cache::{cache_key, CacheAside, CachedEnvelope, ReadStrategy, RebuildPool};
pub use seckill::{
    MemoryLedger, Order, OrderLedger, PurchaseCoordinator, PurchaseOutcome, Rejection,
    RequestContext, Voucher,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of flashsale
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
