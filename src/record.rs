//! System of record
//!
//! The durable store behind the cache. The cache engine only needs two
//! things from it: load an entity by id, and persist one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Something the cache can hold
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity type segment of cache and lock keys (`cache:<KIND>:<id>`)
    const KIND: &'static str;

    fn id(&self) -> u64;
}

/// Read/write access to the system of record
pub trait Repository<T: Entity>: Send + Sync + 'static {
    /// `Ok(None)` when the entity does not exist
    fn load(&self, id: u64) -> Result<Option<T>>;

    /// Durable write
    fn persist(&self, entity: &T) -> Result<()>;
}

/// A shop listing, the hot read path of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: u64,
    pub name: String,
    pub type_id: u64,
    pub area: String,
    pub address: String,
    /// Rating x10
    pub score: u32,
}

impl Entity for Shop {
    const KIND: &'static str = "shop";

    fn id(&self) -> u64 {
        self.id
    }
}

/// In-process repository
///
/// Counts loads so callers can observe how often the cache falls through.
pub struct MemoryRepository<T> {
    rows: RwLock<HashMap<u64, T>>,
    loads: AtomicUsize,
}

impl<T: Entity> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_rows(rows: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.rows.write();
            for row in rows {
                map.insert(row.id(), row);
            }
        }
        repo
    }

    /// Remove a row without touching any cache
    pub fn remove(&self, id: u64) -> Option<T> {
        self.rows.write().remove(&id)
    }

    /// Number of `load` calls served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<T: Entity> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Repository<T> for MemoryRepository<T> {
    fn load(&self, id: u64) -> Result<Option<T>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.read().get(&id).cloned())
    }

    fn persist(&self, entity: &T) -> Result<()> {
        self.rows.write().insert(entity.id(), entity.clone());
        Ok(())
    }
}
