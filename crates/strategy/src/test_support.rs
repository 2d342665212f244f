//! In-memory gateways shared by the unit tests of this crate.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use funding_sniper_core::{
    AccountGateway, FundingSnapshot, Instrument, MarginMode, MarketDataGateway, OrderGateway,
    OrderRequest,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn instrument(symbol: &str, tick: Decimal, step: Decimal, min_qty: Decimal) -> Instrument {
    Instrument {
        symbol: symbol.to_string(),
        contract_type: "LinearPerpetual".to_string(),
        quote_asset: "USDT".to_string(),
        tick_size: tick,
        qty_step: step,
        min_qty,
        max_qty: Decimal::from(1_000_000),
    }
}

pub fn snapshot(rate: Decimal, next_funding_time: i64, mark_price: Decimal) -> FundingSnapshot {
    FundingSnapshot {
        mark_price,
        funding_rate: rate,
        next_funding_time,
    }
}

#[derive(Default)]
pub struct MockMarketData {
    pub instruments: Vec<Instrument>,
    pub snapshots: HashMap<String, FundingSnapshot>,
    pub fail_universe: bool,
    pub lookup_delay: Duration,
    /// Successive `mark_price` answers; `None` entries simulate failed polls.
    pub prices: Mutex<VecDeque<Option<Decimal>>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl MockMarketData {
    pub fn with(entries: Vec<(Instrument, Option<FundingSnapshot>)>) -> Self {
        let mut market = Self::default();
        for (instrument, snapshot) in entries {
            if let Some(snapshot) = snapshot {
                market.snapshots.insert(instrument.symbol.clone(), snapshot);
            }
            market.instruments.push(instrument);
        }
        market
    }

    pub fn push_prices(&self, prices: impl IntoIterator<Item = Option<Decimal>>) {
        self.prices.lock().unwrap().extend(prices);
    }
}

#[async_trait]
impl MarketDataGateway for MockMarketData {
    async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        if self.fail_universe {
            bail!("instruments-info unavailable");
        }
        Ok(self.instruments.clone())
    }

    async fn funding_snapshot(&self, symbol: &str) -> Result<FundingSnapshot> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.snapshots
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no premium index for {symbol}"))
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        let next = self.prices.lock().unwrap().pop_front();
        match next {
            Some(Some(price)) => Ok(price),
            Some(None) => bail!("price unavailable"),
            None => Ok(self.funding_snapshot(symbol).await?.mark_price),
        }
    }
}

#[derive(Default)]
pub struct RecordingOrders {
    pub orders: Mutex<Vec<OrderRequest>>,
    pub fail: bool,
}

impl RecordingOrders {
    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for RecordingOrders {
    async fn submit(&self, order: OrderRequest) -> Result<()> {
        if self.fail {
            bail!("order connection is not active");
        }
        self.orders.lock().unwrap().push(order);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAccount {
    pub leverage_calls: Mutex<Vec<(String, u32)>>,
    pub fail_leverage: bool,
}

#[async_trait]
impl AccountGateway for MockAccount {
    async fn wallet_balance(&self) -> Result<Decimal> {
        Ok(Decimal::from(10_000))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if self.fail_leverage {
            bail!("API error 10001: leverage invalid");
        }
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn set_margin_mode(&self, _mode: MarginMode) -> Result<()> {
        Ok(())
    }
}
