//! Distributed identifier generator
//!
//! ## Layout
//! ```text
//! ┌──────────┬────────────────────────┬──────────────────────────────┐
//! │ sign (1) │ seconds since epoch(31)│ per-day sequence (32)        │
//! └──────────┴────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The sequence comes from a counter in the shared store keyed
//! `id:<namespace>:<yyyyMMdd>`, so every generator pointed at the same
//! store draws from one monotonic source. The counter restarts each day;
//! the time segment keeps identifiers unique across days.
//!
//! Clock rollback is not handled: a clock that jumps back across a day
//! boundary can mint duplicates.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{FlashError, Result};
use crate::store::SharedStore;

/// Bits used by the sequence segment
pub const SEQUENCE_BITS: u32 = 32;

/// Largest time segment that keeps the sign bit clear
const MAX_TIME_SEGMENT: i64 = (1 << 31) - 1;

const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// A 64-bit, time-ordered identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(i64);

impl Identifier {
    pub fn from_parts(time_segment: u32, sequence: u32) -> Self {
        Self(((time_segment as i64 & MAX_TIME_SEGMENT) << SEQUENCE_BITS) | sequence as i64)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Seconds since the generator epoch
    pub fn time_segment(self) -> u32 {
        (self.0 >> SEQUENCE_BITS) as u32
    }

    pub fn sequence(self) -> u32 {
        (self.0 & MAX_SEQUENCE) as u32
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints identifiers from the shared counter
#[derive(Clone)]
pub struct IdGenerator {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    epoch_secs: i64,
}

impl IdGenerator {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, epoch_secs: i64) -> Self {
        Self {
            store,
            clock,
            epoch_secs,
        }
    }

    /// Counter key for `namespace` on the given day
    pub fn counter_key(namespace: &str, day: &str) -> String {
        format!("id:{}:{}", namespace, day)
    }

    /// Next identifier in `namespace`
    ///
    /// Strictly increasing per namespace while the wall clock does not go
    /// backwards.
    pub fn next_id(&self, namespace: &str) -> Result<Identifier> {
        let now = self.clock.now();

        let time_segment = now.timestamp() - self.epoch_secs;
        if !(0..=MAX_TIME_SEGMENT).contains(&time_segment) {
            return Err(FlashError::ClockOutOfRange(time_segment));
        }

        let day = now.format("%Y%m%d").to_string();
        let sequence = self.store.incr(&Self::counter_key(namespace, &day))?;
        if !(0..=MAX_SEQUENCE).contains(&sequence) {
            return Err(FlashError::SequenceExhausted {
                namespace: namespace.to_string(),
                day,
            });
        }

        let id = Identifier::from_parts(time_segment as u32, sequence as u32);
        tracing::trace!("Minted {} in {} ({}#{})", id, namespace, day, sequence);
        Ok(id)
    }
}
