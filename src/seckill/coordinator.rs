//! Purchase coordinator
//!
//! Orchestrates one purchase across the lock service, the id generator and
//! the ledger.
//!
//! The conditional decrement alone already prevents oversell. The per-user
//! lock plus the ledger's idempotency re-check is what stops two racing
//! requests from the same user both getting an order.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;
use crate::id::IdGenerator;
use crate::lock::{lock_key, DistributedLock};
use super::{
    OrderDraft, OrderLedger, PurchaseOutcome, Rejection, RequestContext, ORDER_ID_NAMESPACE,
    ORDER_LOCK_RESOURCE,
};

/// Runs the flash-sale purchase workflow
pub struct PurchaseCoordinator<L: OrderLedger> {
    ledger: Arc<L>,
    lock: DistributedLock,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
}

impl<L: OrderLedger> PurchaseCoordinator<L> {
    pub fn new(
        ledger: Arc<L>,
        lock: DistributedLock,
        ids: IdGenerator,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            lock,
            ids,
            clock,
            lock_ttl,
        }
    }

    /// Try to buy one unit of `voucher_id` for the caller in `ctx`
    ///
    /// Business rejections are `Ok(Rejected(..))`. `Err` means the purchase
    /// could not be evaluated at all (lock store or ledger unreachable); in
    /// that case nothing was committed.
    pub fn purchase(&self, ctx: &RequestContext, voucher_id: u64) -> Result<PurchaseOutcome> {
        let now = self.clock.now();

        let Some(voucher) = self.ledger.load_voucher(voucher_id)? else {
            return Ok(reject(ctx, voucher_id, Rejection::VoucherNotFound));
        };

        if !voucher.has_started(now) {
            return Ok(reject(ctx, voucher_id, Rejection::NotStarted));
        }
        if voucher.has_ended(now) {
            return Ok(reject(ctx, voucher_id, Rejection::Ended));
        }

        // Fast path only; the ledger's conditional decrement is authoritative
        if voucher.stock < 1 {
            return Ok(reject(ctx, voucher_id, Rejection::OutOfStock));
        }

        // Keyed by user, not voucher: different users never contend
        let key = lock_key(ORDER_LOCK_RESOURCE, ctx.user_id);
        let Some(guard) = self.lock.try_lock(&key, self.lock_ttl)? else {
            return Ok(reject(ctx, voucher_id, Rejection::DuplicateRequest));
        };

        let draft = OrderDraft {
            user_id: ctx.user_id,
            voucher_id,
            created_at: now,
        };
        let placed = self
            .ledger
            .place_order(draft, &|| self.ids.next_id(ORDER_ID_NAMESPACE));

        // Released on every path; an error here only means the TTL reclaims it
        if let Err(e) = guard.release() {
            tracing::warn!("Failed to release {}: {}", key, e);
        }

        match placed? {
            Ok(order) => {
                tracing::info!(
                    "Order {} placed: user {} voucher {}",
                    order.id,
                    order.user_id,
                    order.voucher_id
                );
                Ok(PurchaseOutcome::Success(order.id))
            }
            Err(reason) => Ok(reject(ctx, voucher_id, reason)),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }
}

fn reject(ctx: &RequestContext, voucher_id: u64, reason: Rejection) -> PurchaseOutcome {
    tracing::debug!(
        "Purchase of voucher {} by user {} rejected: {}",
        voucher_id,
        ctx.user_id,
        reason
    );
    PurchaseOutcome::Rejected(reason)
}
