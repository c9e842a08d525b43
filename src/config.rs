//! Configuration for flashsale
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::cache::ReadStrategy;
use crate::error::{FlashError, Result};

/// Main configuration shared by the cache engine, locks, id generator and server
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Native TTL for positive cache entries
    pub cache_ttl: Duration,

    /// Native TTL for negative (confirmed absent) sentinels.
    /// Must be shorter than `cache_ttl`.
    pub null_ttl: Duration,

    /// Logical expiry written into envelopes by the logical-expire strategy
    pub logical_ttl: Duration,

    /// Which strategy backs `CacheAside::read`
    pub read_strategy: ReadStrategy,

    // -------------------------------------------------------------------------
    // Lock Configuration
    // -------------------------------------------------------------------------
    /// TTL of the per-key cache rebuild lock
    pub rebuild_lock_ttl: Duration,

    /// TTL of the per-user purchase lock
    pub order_lock_ttl: Duration,

    /// Sleep between attempts when the mutex strategy loses the lock race
    pub mutex_retry_backoff: Duration,

    /// Upper bound on attempts for the mutex strategy
    pub mutex_max_attempts: u32,

    // -------------------------------------------------------------------------
    // Rebuild Pool Configuration
    // -------------------------------------------------------------------------
    /// Fixed number of background rebuild workers
    pub rebuild_workers: usize,

    /// Queued rebuilds beyond this are dropped (readers keep getting stale data)
    pub rebuild_queue_capacity: usize,

    // -------------------------------------------------------------------------
    // Identifier Configuration
    // -------------------------------------------------------------------------
    /// Epoch of the identifier time segment (unix seconds)
    pub id_epoch_secs: i64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address of the shared store server
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// 2022-01-01T00:00:00Z
pub const DEFAULT_ID_EPOCH_SECS: i64 = 1_640_995_200;

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 60),
            null_ttl: Duration::from_secs(2 * 60),
            logical_ttl: Duration::from_secs(30 * 60),
            read_strategy: ReadStrategy::LogicalExpire,
            rebuild_lock_ttl: Duration::from_secs(10),
            order_lock_ttl: Duration::from_secs(10),
            mutex_retry_backoff: Duration::from_millis(50),
            mutex_max_attempts: 100,
            rebuild_workers: 10,
            rebuild_queue_capacity: 1024,
            id_epoch_secs: DEFAULT_ID_EPOCH_SECS,
            listen_addr: "127.0.0.1:6380".to_string(),
            max_connections: 1024,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rebuild_workers == 0 {
            return Err(FlashError::Config("rebuild_workers must be > 0".to_string()));
        }
        if self.rebuild_queue_capacity == 0 {
            return Err(FlashError::Config(
                "rebuild_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.mutex_max_attempts == 0 {
            return Err(FlashError::Config("mutex_max_attempts must be > 0".to_string()));
        }
        for (name, ttl) in [
            ("cache_ttl", self.cache_ttl),
            ("null_ttl", self.null_ttl),
            ("logical_ttl", self.logical_ttl),
            ("rebuild_lock_ttl", self.rebuild_lock_ttl),
            ("order_lock_ttl", self.order_lock_ttl),
        ] {
            if ttl.is_zero() {
                return Err(FlashError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.null_ttl >= self.cache_ttl {
            return Err(FlashError::Config(format!(
                "null_ttl ({:?}) must be shorter than cache_ttl ({:?})",
                self.null_ttl, self.cache_ttl
            )));
        }
        if self.max_connections == 0 {
            return Err(FlashError::Config("max_connections must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the TTL of positive cache entries
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the TTL of negative cache sentinels
    pub fn null_ttl(mut self, ttl: Duration) -> Self {
        self.config.null_ttl = ttl;
        self
    }

    /// Set the logical expiry used by the logical-expire strategy
    pub fn logical_ttl(mut self, ttl: Duration) -> Self {
        self.config.logical_ttl = ttl;
        self
    }

    /// Set the strategy backing `CacheAside::read`
    pub fn read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.config.read_strategy = strategy;
        self
    }

    /// Set the cache rebuild lock TTL
    pub fn rebuild_lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.rebuild_lock_ttl = ttl;
        self
    }

    /// Set the purchase lock TTL
    pub fn order_lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.order_lock_ttl = ttl;
        self
    }

    /// Set the backoff between mutex strategy attempts
    pub fn mutex_retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.mutex_retry_backoff = backoff;
        self
    }

    /// Set the attempt cap of the mutex strategy
    pub fn mutex_max_attempts(mut self, attempts: u32) -> Self {
        self.config.mutex_max_attempts = attempts;
        self
    }

    /// Set the number of rebuild workers
    pub fn rebuild_workers(mut self, workers: usize) -> Self {
        self.config.rebuild_workers = workers;
        self
    }

    /// Set the rebuild queue capacity
    pub fn rebuild_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.rebuild_queue_capacity = capacity;
        self
    }

    /// Set the identifier epoch (unix seconds)
    pub fn id_epoch_secs(mut self, secs: i64) -> Self {
        self.config.id_epoch_secs = secs;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
