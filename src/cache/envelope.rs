//! Logical-expiry envelope
//!
//! The store entry itself never expires; freshness is decided by the
//! application from `logical_expiry_ms`.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cached payload plus its application-defined expiry
///
/// `payload == None` records that the entity was confirmed absent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEnvelope<T> {
    pub payload: Option<T>,

    /// Unix milliseconds
    logical_expiry_ms: i64,
}

impl<T> CachedEnvelope<T> {
    /// Wrap `payload`, expiring `ttl` after `now`
    pub fn new(payload: Option<T>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            payload,
            logical_expiry_ms: now.timestamp_millis().saturating_add(ttl_ms),
        }
    }

    pub fn logical_expiry(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.logical_expiry_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Past its logical expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.logical_expiry_ms
    }
}

impl<T: Serialize + DeserializeOwned> CachedEnvelope<T> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
