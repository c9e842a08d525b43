//! Error types for flashsale
//!
//! Provides a unified error type for all operations.
//!
//! Business outcomes are not errors: an entity that is absent upstream is
//! `Ok(None)`, and a rejected purchase is `Ok(PurchaseOutcome::Rejected(..))`.

use thiserror::Error;

/// Result type alias using FlashError
pub type Result<T> = std::result::Result<T, FlashError>;

/// Unified error type for flashsale operations
#[derive(Debug, Error)]
pub enum FlashError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Shared Store Errors
    // -------------------------------------------------------------------------
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Lock {key} still busy after {attempts} attempts")]
    LockBusy { key: String, attempts: u32 },

    // -------------------------------------------------------------------------
    // System of Record Errors
    // -------------------------------------------------------------------------
    #[error("Repository error: {0}")]
    Repository(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Identifier Errors
    // -------------------------------------------------------------------------
    #[error("Clock out of range for identifier time segment: {0}s since epoch")]
    ClockOutOfRange(i64),

    #[error("Identifier sequence exhausted for {namespace} on {day}")]
    SequenceExhausted { namespace: String, day: String },
}

impl FlashError {
    /// True when the shared store could not be reached.
    ///
    /// The cache read path degrades to the system of record on these; the
    /// purchase path must fail instead.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, FlashError::StoreUnavailable(_))
    }
}

impl From<bincode::Error> for FlashError {
    fn from(e: bincode::Error) -> Self {
        FlashError::Serialization(e.to_string())
    }
}
