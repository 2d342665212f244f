use crate::config::MarginMode;
use crate::events::OrderRequest;
use crate::market::{FundingSnapshot, Instrument};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Read-only market data needed by the scanner and the breakeven watch.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Every tradeable linear-perpetual instrument settled in the quote currency.
    async fn list_instruments(&self) -> Result<Vec<Instrument>>;

    async fn funding_snapshot(&self, symbol: &str) -> Result<FundingSnapshot>;

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        Ok(self.funding_snapshot(symbol).await?.mark_price)
    }
}

/// One-shot account configuration calls.
#[async_trait]
pub trait AccountGateway: Send + Sync {
    /// Total account equity in the quote currency.
    async fn wallet_balance(&self) -> Result<Decimal>;

    /// Sets buy and sell leverage; "not modified" counts as success.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn set_margin_mode(&self, mode: MarginMode) -> Result<()>;
}

/// Fire-and-forget order submission.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Sends `order`; success means the request was written, not that it filled.
    async fn submit(&self, order: OrderRequest) -> Result<()>;
}

/// Health check for long-lived connections.
pub trait ConnectionHealth: Send + Sync {
    /// Recycles the connection if it has outlived its maximum age; true if it did.
    fn ensure_fresh(&self) -> bool;
}
