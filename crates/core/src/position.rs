use crate::events::Side;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bookkeeping for the single in-flight entry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTrade {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub tick_size: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PendingTrade {
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: Side, quantity: Decimal, tick_size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            tick_size,
            created_at: Utc::now(),
        }
    }

    /// Side used for every protective (exit) order.
    #[must_use]
    pub const fn stop_side(&self) -> Side {
        self.side.opposite()
    }
}

/// Stop-loss and take-profit levels attached after an entry fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectiveOrderPair {
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
}

/// Shared holder of the at-most-one [`PendingTrade`].
///
/// Every transition happens under one lock so that the scheduler installing a
/// trade and the fill handler clearing it can never interleave.
#[derive(Debug, Clone, Default)]
pub struct PendingTradeSlot {
    inner: Arc<Mutex<Option<PendingTrade>>>,
}

impl PendingTradeSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `trade` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns the currently pending trade when the slot is occupied.
    pub fn try_install(&self, trade: PendingTrade) -> Result<(), PendingTrade> {
        let mut guard = self.inner.lock();
        match guard.as_ref() {
            Some(existing) => Err(existing.clone()),
            None => {
                *guard = Some(trade);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<PendingTrade> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Removes and returns the pending trade only if `predicate` accepts it.
    pub fn take_if(&self, predicate: impl FnOnce(&PendingTrade) -> bool) -> Option<PendingTrade> {
        let mut guard = self.inner.lock();
        if guard.as_ref().is_some_and(predicate) {
            guard.take()
        } else {
            None
        }
    }

    pub fn clear(&self) -> Option<PendingTrade> {
        self.inner.lock().take()
    }

    /// Drops a pending trade installed more than `ttl` before `now`.
    pub fn evict_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Option<PendingTrade> {
        self.take_if(|trade| now - trade.created_at > ttl)
    }
}
