//! Seckill Module
//!
//! Flash-sale purchases: time-windowed, stock-limited, one order per user.
//!
//! ## Layers
//! - `PurchaseCoordinator`: window and stock pre-checks, per-user lock,
//!   guaranteed release. Never touches the store of record's transaction.
//! - `OrderLedger`: the transactional side. Idempotency re-check,
//!   conditional decrement, id minting and order insert commit together or
//!   not at all.
//!
//! ## Purchase Flow
//! ```text
//! WindowCheck → StockPeek → AcquireUserLock ─┬─ busy → DuplicateRequest
//!                                            ▼
//!                          ┌──── OrderLedger::place_order (one transaction) ────┐
//!                          │ IdempotencyCheck → ConditionalDecrement → Mint+Insert │
//!                          └──────────────────────────────────────────────────────┘
//!                                            ▼
//!                                    ReleaseUserLock (always)
//! ```

mod coordinator;
mod ledger;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Identifier;

pub use coordinator::PurchaseCoordinator;
pub use ledger::{MemoryLedger, OrderLedger};

/// Id namespace orders are minted in
pub const ORDER_ID_NAMESPACE: &str = "order";

/// Lock resource guarding a user's purchases (`lock:order:<user_id>`)
pub const ORDER_LOCK_RESOURCE: &str = "order";

/// A flash-sale voucher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: u64,
    pub stock: i32,
    /// Inclusive
    pub begin: DateTime<Utc>,
    /// Exclusive
    pub end: DateTime<Utc>,
}

impl Voucher {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.begin
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

/// A placed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Identifier,
    pub user_id: u64,
    pub voucher_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Who is asking. Passed explicitly down the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: u64,
}

impl RequestContext {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}

/// What the ledger is asked to commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: u64,
    pub voucher_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Why a purchase was turned down. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    VoucherNotFound,
    /// Sale window has not opened
    NotStarted,
    /// Sale window has closed
    Ended,
    OutOfStock,
    /// Another purchase by the same user is in progress
    DuplicateRequest,
    AlreadyPurchased,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::VoucherNotFound => "voucher not found",
            Rejection::NotStarted => "sale has not started",
            Rejection::Ended => "sale has ended",
            Rejection::OutOfStock => "out of stock",
            Rejection::DuplicateRequest => "duplicate request",
            Rejection::AlreadyPurchased => "already purchased",
        };
        f.write_str(reason)
    }
}

/// Terminal state of one purchase request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Success(Identifier),
    Rejected(Rejection),
}

impl PurchaseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PurchaseOutcome::Success(_))
    }

    pub fn order_id(&self) -> Option<Identifier> {
        match self {
            PurchaseOutcome::Success(id) => Some(*id),
            PurchaseOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            PurchaseOutcome::Rejected(reason) => Some(*reason),
            PurchaseOutcome::Success(_) => None,
        }
    }
}
