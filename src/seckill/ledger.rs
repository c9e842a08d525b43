//! Order ledger
//!
//! Transactional persistence for vouchers and orders.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::id::Identifier;
use super::{Order, OrderDraft, Rejection, Voucher};

/// Transactional side of a purchase
///
/// `place_order` is one transaction: re-check that the user has no order
/// for the voucher, decrement stock only where `stock > 0`, mint the id,
/// insert the order. Any rejection or error leaves nothing behind.
pub trait OrderLedger: Send + Sync {
    fn load_voucher(&self, voucher_id: u64) -> Result<Option<Voucher>>;

    fn find_order(&self, user_id: u64, voucher_id: u64) -> Result<Option<Order>>;

    fn place_order(
        &self,
        draft: OrderDraft,
        mint: &dyn Fn() -> Result<Identifier>,
    ) -> Result<std::result::Result<Order, Rejection>>;
}

#[derive(Default)]
struct LedgerState {
    vouchers: HashMap<u64, Voucher>,
    orders: HashMap<(u64, u64), Order>,
}

/// In-process ledger. A single mutex stands in for the transaction.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a voucher
    pub fn insert_voucher(&self, voucher: Voucher) {
        self.state.lock().vouchers.insert(voucher.id, voucher);
    }

    /// Current stock, if the voucher exists
    pub fn stock(&self, voucher_id: u64) -> Option<i32> {
        self.state.lock().vouchers.get(&voucher_id).map(|v| v.stock)
    }

    /// All orders, sorted by id
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.state.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }
}

impl OrderLedger for MemoryLedger {
    fn load_voucher(&self, voucher_id: u64) -> Result<Option<Voucher>> {
        Ok(self.state.lock().vouchers.get(&voucher_id).cloned())
    }

    fn find_order(&self, user_id: u64, voucher_id: u64) -> Result<Option<Order>> {
        Ok(self.state.lock().orders.get(&(user_id, voucher_id)).cloned())
    }

    fn place_order(
        &self,
        draft: OrderDraft,
        mint: &dyn Fn() -> Result<Identifier>,
    ) -> Result<std::result::Result<Order, Rejection>> {
        let mut state = self.state.lock();
        let pair = (draft.user_id, draft.voucher_id);

        if state.orders.contains_key(&pair) {
            return Ok(Err(Rejection::AlreadyPurchased));
        }

        // UPDATE ... SET stock = stock - 1 WHERE voucher_id = ? AND stock > 0
        let in_stock = state
            .vouchers
            .get(&draft.voucher_id)
            .is_some_and(|v| v.stock > 0);
        if !in_stock {
            return Ok(Err(Rejection::OutOfStock));
        }

        // Mint before applying anything so a failure needs no rollback
        let id = mint()?;

        if let Some(voucher) = state.vouchers.get_mut(&draft.voucher_id) {
            voucher.stock -= 1;
        }

        let order = Order {
            id,
            user_id: draft.user_id,
            voucher_id: draft.voucher_id,
            created_at: draft.created_at,
        };
        state.orders.insert(pair, order.clone());

        Ok(Ok(order))
    }
}
