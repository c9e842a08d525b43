//! Cache-aside engine
//!
//! Reads go cache → system of record → write back. Writes go to the system
//! of record and then delete the cache key, so a write never races a
//! concurrent rebuild into leaving a stale value behind.
//!
//! The store is treated as optional: when it is unreachable, every read
//! strategy answers straight from the system of record.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{FlashError, Result};
use crate::lock::{lock_key, DistributedLock};
use crate::record::{Entity, Repository};
use crate::store::{KvStore, SharedStore};

use super::{cache_key, CachedEnvelope, ReadStrategy, RebuildPool};

/// What the store holds for a key under the TTL-based strategies
enum Lookup<T> {
    Hit(T),
    /// Empty sentinel: confirmed absent upstream
    Absent,
    Miss,
}

/// Cache-aside reads and write-through invalidation for one entity type
pub struct CacheAside<T: Entity, R: Repository<T>> {
    config: Config,
    store: SharedStore,
    repo: Arc<R>,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,

    /// Async rebuilds for the logical-expire strategy only
    pool: RebuildPool,

    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, R: Repository<T>> CacheAside<T, R> {
    /// Build an engine and start its rebuild pool
    pub fn new(
        config: Config,
        store: SharedStore,
        repo: Arc<R>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = RebuildPool::new(config.rebuild_workers, config.rebuild_queue_capacity)?;
        let lock = DistributedLock::new(Arc::clone(&store));

        Ok(Self {
            config,
            store,
            repo,
            lock,
            clock,
            pool,
            _entity: PhantomData,
        })
    }

    /// Read through the configured strategy
    pub fn read(&self, id: u64) -> Result<Option<T>> {
        match self.config.read_strategy {
            ReadStrategy::PassThrough => self.read_pass_through(id),
            ReadStrategy::Mutex => self.read_with_mutex(id),
            ReadStrategy::LogicalExpire => self.read_with_logical_expiry(id),
        }
    }

    // =========================================================================
    // Strategy (a): pass-through with negative caching
    // =========================================================================

    /// Cache hit → value; sentinel → None; miss → load and fill
    ///
    /// Concurrent misses on one key may each load; nothing serializes them.
    pub fn read_pass_through(&self, id: u64) -> Result<Option<T>> {
        let key = cache_key::<T>(id);

        match self.lookup(&key) {
            Ok(Lookup::Hit(entity)) => return Ok(Some(entity)),
            Ok(Lookup::Absent) => return Ok(None),
            Ok(Lookup::Miss) => {}
            Err(e) if e.is_store_unavailable() => return self.load_degraded(id, &e),
            Err(e) => return Err(e),
        }

        self.load_and_fill(id, &key)
    }

    // =========================================================================
    // Strategy (b): mutex-guarded rebuild
    // =========================================================================

    /// Like pass-through, but a miss must win the rebuild lock to load.
    ///
    /// Losers sleep `mutex_retry_backoff` and start over. After
    /// `mutex_max_attempts` lost races the read fails with `LockBusy`.
    pub fn read_with_mutex(&self, id: u64) -> Result<Option<T>> {
        let key = cache_key::<T>(id);
        let rebuild_key = lock_key(T::KIND, id);
        let max_attempts = self.config.mutex_max_attempts;

        for attempt in 1..=max_attempts {
            match self.lookup(&key) {
                Ok(Lookup::Hit(entity)) => return Ok(Some(entity)),
                Ok(Lookup::Absent) => return Ok(None),
                Ok(Lookup::Miss) => {}
                Err(e) if e.is_store_unavailable() => return self.load_degraded(id, &e),
                Err(e) => return Err(e),
            }

            let guard = match self.lock.try_lock(&rebuild_key, self.config.rebuild_lock_ttl) {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    tracing::debug!("{} busy (attempt {}/{})", rebuild_key, attempt, max_attempts);
                    if attempt < max_attempts {
                        thread::sleep(self.config.mutex_retry_backoff);
                    }
                    continue;
                }
                Err(e) if e.is_store_unavailable() => return self.load_degraded(id, &e),
                Err(e) => return Err(e),
            };

            // Whoever held the lock before us may have filled the key already
            match self.lookup(&key) {
                Ok(Lookup::Hit(entity)) => return Ok(Some(entity)),
                Ok(Lookup::Absent) => return Ok(None),
                Ok(Lookup::Miss) => {}
                Err(e) if e.is_store_unavailable() => return self.load_degraded(id, &e),
                Err(e) => return Err(e),
            }

            let result = self.load_and_fill(id, &key);
            if let Err(e) = guard.release() {
                tracing::warn!("Failed to release {}: {}", rebuild_key, e);
            }
            return result;
        }

        tracing::warn!("Gave up on {} after {} attempts", rebuild_key, max_attempts);
        Err(FlashError::LockBusy {
            key: rebuild_key,
            attempts: max_attempts,
        })
    }

    // =========================================================================
    // Strategy (c): logical expiration with async rebuild
    // =========================================================================

    /// Never blocks on a rebuild.
    ///
    /// A miss is reported as None (keys are expected to be warmed). A fresh
    /// envelope is returned as is. An expired one is returned as is too,
    /// after handing a rebuild to the pool if this caller won the lock.
    pub fn read_with_logical_expiry(&self, id: u64) -> Result<Option<T>> {
        let key = cache_key::<T>(id);

        let envelope = match self.lookup_envelope(&key) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(None),
            Err(e) if e.is_store_unavailable() => return self.load_degraded(id, &e),
            Err(e) => return Err(e),
        };

        if !envelope.is_expired(self.clock.now()) {
            return Ok(envelope.payload);
        }

        let rebuild_key = lock_key(T::KIND, id);
        let guard = match self.lock.try_lock(&rebuild_key, self.config.rebuild_lock_ttl) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::trace!("{} already rebuilding; serving stale", key);
                return Ok(envelope.payload);
            }
            Err(e) => {
                tracing::warn!("Could not take {}: {}; serving stale", rebuild_key, e);
                return Ok(envelope.payload);
            }
        };

        // Someone may have rebuilt between our read and our acquire
        match self.lookup_envelope(&key) {
            Ok(Some(current)) if !current.is_expired(self.clock.now()) => {
                drop(guard);
                return Ok(current.payload);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Re-check of {} failed: {}; serving stale", key, e);
                return Ok(envelope.payload);
            }
        }

        let store = Arc::clone(&self.store);
        let repo = Arc::clone(&self.repo);
        let clock = Arc::clone(&self.clock);
        let ttl = self.config.logical_ttl;
        let null_ttl = self.config.null_ttl;
        let task_key = key.clone();

        let submitted = self.pool.submit(move || {
            // Released when the task ends, however it ends
            let _guard = guard;
            let rebuilt = rebuild_envelope::<T, R>(
                store.as_ref(),
                repo.as_ref(),
                clock.as_ref(),
                &task_key,
                id,
                ttl,
                null_ttl,
            );
            match rebuilt {
                Ok(_) => tracing::info!("Rebuilt {}", task_key),
                Err(e) => tracing::warn!("Rebuild of {} failed: {}", task_key, e),
            }
        });
        if !submitted {
            tracing::warn!("Rebuild of {} not scheduled; serving stale", key);
        }

        Ok(envelope.payload)
    }

    /// Load `id` now and store it as a logical-expiry envelope with no
    /// native TTL. Returns whether the entity exists.
    pub fn warm(&self, id: u64, logical_ttl: Duration) -> Result<bool> {
        let key = cache_key::<T>(id);
        let found = rebuild_envelope::<T, R>(
            self.store.as_ref(),
            self.repo.as_ref(),
            self.clock.as_ref(),
            &key,
            id,
            logical_ttl,
            self.config.null_ttl.min(logical_ttl),
        )?;
        tracing::info!("Warmed {} (present: {})", key, found);
        Ok(found)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persist to the system of record, then drop the cached copy
    pub fn update(&self, entity: &T) -> Result<()> {
        self.repo.persist(entity)?;
        self.invalidate(entity.id())
    }

    /// Delete the cached copy; the next read repopulates it
    pub fn invalidate(&self, id: u64) -> Result<()> {
        let key = cache_key::<T>(id);
        match self.store.delete(&key) {
            Ok(_) => Ok(()),
            Err(e) if e.is_store_unavailable() => {
                tracing::warn!("Could not invalidate {}: {}", key, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Finish queued rebuilds and stop the pool
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn pool(&self) -> &RebuildPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lookup(&self, key: &str) -> Result<Lookup<T>> {
        let Some(bytes) = self.store.get(key)? else {
            tracing::trace!("Cache miss {}", key);
            return Ok(Lookup::Miss);
        };

        if bytes.is_empty() {
            tracing::trace!("Cache negative hit {}", key);
            return Ok(Lookup::Absent);
        }

        match bincode::deserialize(&bytes) {
            Ok(entity) => Ok(Lookup::Hit(entity)),
            Err(e) => {
                tracing::warn!("Discarding undecodable entry {}: {}", key, e);
                self.store.delete(key)?;
                Ok(Lookup::Miss)
            }
        }
    }

    fn lookup_envelope(&self, key: &str) -> Result<Option<CachedEnvelope<T>>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };

        match CachedEnvelope::decode(&bytes) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::warn!("{} does not hold an envelope: {}", key, e);
                Ok(None)
            }
        }
    }

    fn load_and_fill(&self, id: u64, key: &str) -> Result<Option<T>> {
        let loaded = self.repo.load(id)?;

        let written = match &loaded {
            Some(entity) => self
                .store
                .set(key, &bincode::serialize(entity)?, Some(self.config.cache_ttl)),
            None => self.store.set(key, &[], Some(self.config.null_ttl)),
        };

        match written {
            Ok(()) => {}
            Err(e) if e.is_store_unavailable() => {
                tracing::warn!("Could not fill {}: {}", key, e);
            }
            Err(e) => return Err(e),
        }

        Ok(loaded)
    }

    fn load_degraded(&self, id: u64, cause: &FlashError) -> Result<Option<T>> {
        tracing::warn!("Cache store unavailable ({}); reading {}:{} directly", cause, T::KIND, id);
        self.repo.load(id)
    }
}

/// Load and write a fresh envelope. Absent entities get a short-lived
/// negative envelope.
fn rebuild_envelope<T, R>(
    store: &dyn KvStore,
    repo: &R,
    clock: &dyn Clock,
    key: &str,
    id: u64,
    ttl: Duration,
    null_ttl: Duration,
) -> Result<bool>
where
    T: Entity,
    R: Repository<T>,
{
    let loaded = repo.load(id)?;
    let found = loaded.is_some();
    let ttl = if found { ttl } else { null_ttl };

    let envelope = CachedEnvelope::new(loaded, clock.now(), ttl);
    store.set(key, &envelope.encode()?, None)?;
    Ok(found)
}
