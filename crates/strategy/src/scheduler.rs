//! Top-level trading loop: scan, wait for the funding window, enter, cool down.

use crate::scanner::MarketScanner;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use funding_sniper_core::{
    truncate_to_step, AccountGateway, AppConfig, ConnectionHealth, Instrument, MarketDataGateway,
    OrderGateway, OrderRequest, PendingTrade, PendingTradeSlot, Side,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const MINUTE_MS: i64 = 60_000;
/// How close the next funding event must be before a candidate is acted on.
pub const ENTRY_WINDOW_MS: i64 = 5 * MINUTE_MS;
/// Lead before funding at which the mark price is re-fetched.
pub const PRICE_REFRESH_LEAD_MS: i64 = MINUTE_MS;
pub const IDLE_SLEEP: Duration = Duration::from_secs(5 * 60);
pub const COOLDOWN: Duration = Duration::from_secs(60);

/// Wall-clock source; tests substitute one driven by tokio's paused time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Quote-currency margin per trade.
    pub margin: Decimal,
    pub leverage: u32,
    pub entry_offset_ms: i64,
    pub pending_trade_ttl: chrono::Duration,
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let ttl_secs = i64::try_from(config.trading.pending_trade_ttl_secs).unwrap_or(i64::MAX);
        Self {
            margin: config.trading.margin,
            leverage: config.trading.leverage,
            entry_offset_ms: config.trading.first_order_time_offset_ms,
            pending_trade_ttl: chrono::Duration::try_seconds(ttl_secs)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// A previous entry is still waiting for its fill.
    PendingTradeActive,
    /// The next funding event was further away than the entry window.
    FundingTooFar { next_funding_time: i64 },
    NoCandidates,
    /// The mark price could not be re-fetched before entry.
    PriceUnavailable { symbol: String },
    EntrySubmitted {
        symbol: String,
        side: Side,
        quantity: Decimal,
    },
    EntryFailed { symbol: String },
}

pub struct TradingScheduler {
    scanner: MarketScanner,
    market: Arc<dyn MarketDataGateway>,
    account: Arc<dyn AccountGateway>,
    orders: Arc<dyn OrderGateway>,
    pending: PendingTradeSlot,
    connections: Vec<Arc<dyn ConnectionHealth>>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl TradingScheduler {
    #[must_use]
    pub fn new(
        scanner: MarketScanner,
        market: Arc<dyn MarketDataGateway>,
        account: Arc<dyn AccountGateway>,
        orders: Arc<dyn OrderGateway>,
        pending: PendingTradeSlot,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            scanner,
            market,
            account,
            orders,
            pending,
            connections: Vec::new(),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Connections health-checked at the start of every iteration.
    #[must_use]
    pub fn with_connections(mut self, connections: Vec<Arc<dyn ConnectionHealth>>) -> Self {
        self.connections = connections;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs iterations until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns the first fatal condition: universe fetch failure, leverage
    /// rejection, or an entry quantity below the instrument minimum.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(margin = %self.settings.margin, leverage = self.settings.leverage, "scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler stopping");
                    return Ok(());
                }
                outcome = self.run_once() => {
                    let outcome = outcome?;
                    info!(?outcome, "iteration finished");
                }
            }
        }
    }

    /// One pass of the trading loop, including its trailing sleep.
    ///
    /// # Errors
    ///
    /// Only fatal conditions are returned; see [`TradingScheduler::run`].
    pub async fn run_once(&self) -> Result<IterationOutcome> {
        for connection in &self.connections {
            if connection.ensure_fresh() {
                info!("recycled aged streaming connection");
            }
        }

        if let Some(stale) = self
            .pending
            .evict_stale(self.clock.now(), self.settings.pending_trade_ttl)
        {
            warn!(
                symbol = %stale.symbol,
                quantity = %stale.quantity,
                created_at = %stale.created_at,
                "evicting stale pending trade"
            );
        }

        if let Some(pending) = self.pending.current() {
            info!(symbol = %pending.symbol, "entry still pending; waiting for fill");
            tokio::time::sleep(COOLDOWN).await;
            return Ok(IterationOutcome::PendingTradeActive);
        }

        let outcome = self.scanner.scan(self.clock.now_ms()).await?;

        let Some(funding_time) = outcome.next_funding_time else {
            info!("no upcoming funding event found");
            tokio::time::sleep(IDLE_SLEEP).await;
            return Ok(IterationOutcome::NoCandidates);
        };

        let window_start = funding_time - ENTRY_WINDOW_MS;
        if self.clock.now_ms() < window_start {
            info!(
                next_funding = ?outcome.next_funding_at(),
                "next funding too far away; sleeping until entry window"
            );
            self.sleep_until(window_start).await;
            return Ok(IterationOutcome::FundingTooFar {
                next_funding_time: funding_time,
            });
        }

        let Some(candidate) = outcome.top().cloned() else {
            info!("no candidate passed the funding-rate threshold");
            tokio::time::sleep(IDLE_SLEEP).await;
            return Ok(IterationOutcome::NoCandidates);
        };
        let symbol = candidate.symbol().to_string();
        let side = candidate.entry_side();
        info!(
            %symbol,
            rate = %candidate.snapshot.funding_rate,
            %side,
            "selected funding candidate"
        );

        self.account
            .set_leverage(&symbol, self.settings.leverage)
            .await
            .with_context(|| format!("failed to set leverage for {symbol}"))?;

        self.sleep_until(funding_time - PRICE_REFRESH_LEAD_MS).await;

        let price = match self.market.mark_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                warn!(%symbol, %price, "non-positive mark price before entry");
                return Ok(IterationOutcome::PriceUnavailable { symbol });
            }
            Err(e) => {
                warn!(%symbol, error = %e, "failed to refresh mark price before entry");
                return Ok(IterationOutcome::PriceUnavailable { symbol });
            }
        };

        let quantity = entry_quantity(
            self.settings.margin,
            self.settings.leverage,
            price,
            &candidate.instrument,
        )?;

        self.sleep_until(entry_wake_time_ms(funding_time, self.settings.entry_offset_ms))
            .await;

        let result = self
            .submit_entry(&candidate.instrument, side, quantity)
            .await;
        tokio::time::sleep(COOLDOWN).await;
        Ok(result)
    }

    async fn submit_entry(&self, instrument: &Instrument, side: Side, quantity: Decimal) -> IterationOutcome {
        let symbol = instrument.symbol.clone();
        let mut trade = PendingTrade::new(&symbol, side, quantity, instrument.tick_size);
        trade.created_at = self.clock.now();

        if let Err(existing) = self.pending.try_install(trade) {
            warn!(%symbol, pending = %existing.symbol, "pending trade appeared before entry");
            return IterationOutcome::PendingTradeActive;
        }

        match self
            .orders
            .submit(OrderRequest::market(&symbol, side, quantity))
            .await
        {
            Ok(()) => {
                info!(%symbol, %side, %quantity, "entry order submitted");
                IterationOutcome::EntrySubmitted {
                    symbol,
                    side,
                    quantity,
                }
            }
            Err(e) => {
                error!(%symbol, error = %e, "entry order submission failed");
                self.pending.clear();
                IterationOutcome::EntryFailed { symbol }
            }
        }
    }

    async fn sleep_until(&self, target_ms: i64) {
        let wait = target_ms - self.clock.now_ms();
        if let Ok(wait) = u64::try_from(wait) {
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
    }
}

/// `(margin * leverage) / price`, truncated to the instrument's quantity step.
///
/// # Errors
///
/// Fails when the truncated quantity is below the instrument minimum, since
/// the configured margin can then never open a position.
pub fn entry_quantity(
    margin: Decimal,
    leverage: u32,
    price: Decimal,
    instrument: &Instrument,
) -> Result<Decimal> {
    let notional = margin * Decimal::from(leverage);
    let raw = notional
        .checked_div(price)
        .ok_or_else(|| anyhow!("cannot size {} at price {price}", instrument.symbol))?;
    let mut quantity = truncate_to_step(raw, instrument.qty_step);

    if instrument.max_qty > Decimal::ZERO && quantity > instrument.max_qty {
        let capped = truncate_to_step(instrument.max_qty, instrument.qty_step);
        warn!(
            symbol = %instrument.symbol,
            requested = %quantity,
            capped = %capped,
            "entry quantity exceeds the maximum order quantity, clamping"
        );
        quantity = capped;
    }

    if quantity < instrument.min_qty {
        bail!(
            "entry quantity {quantity} for {} is below the minimum order quantity {} (margin {margin}, leverage {leverage}, price {price})",
            instrument.symbol,
            instrument.min_qty
        );
    }
    Ok(quantity)
}

/// Instant at which the entry order is sent.
///
/// Whole seconds of `offset_ms` shift the funding time; the result is the
/// first second boundary at or after that, plus the sub-second remainder.
#[must_use]
pub fn entry_wake_time_ms(funding_time_ms: i64, offset_ms: i64) -> i64 {
    let shifted = funding_time_ms + offset_ms.div_euclid(1000) * 1000;
    let boundary = match shifted.rem_euclid(1000) {
        0 => shifted,
        rem => shifted - rem + 1000,
    };
    boundary + offset_ms.rem_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{instrument, snapshot, MockAccount, MockMarketData, RecordingOrders};
    use funding_sniper_core::{OrderKind, ScannerConfig};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T: i64 = 1_714_867_200_000;

    struct PausedClock {
        base_ms: i64,
        start: tokio::time::Instant,
    }

    impl PausedClock {
        fn at(base_ms: i64) -> Arc<Self> {
            Arc::new(Self {
                base_ms,
                start: tokio::time::Instant::now(),
            })
        }
    }

    impl Clock for PausedClock {
        fn now_ms(&self) -> i64 {
            let elapsed = i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX);
            self.base_ms + elapsed
        }
    }

    #[derive(Default)]
    struct CountingHealth {
        checks: AtomicUsize,
    }

    impl ConnectionHealth for CountingHealth {
        fn ensure_fresh(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    struct Harness {
        scheduler: TradingScheduler,
        market: Arc<MockMarketData>,
        account: Arc<MockAccount>,
        orders: Arc<RecordingOrders>,
        pending: PendingTradeSlot,
        clock: Arc<PausedClock>,
    }

    fn settings(margin: Decimal) -> SchedulerSettings {
        SchedulerSettings {
            margin,
            leverage: 10,
            entry_offset_ms: 0,
            pending_trade_ttl: chrono::Duration::minutes(10),
        }
    }

    fn harness(
        market: MockMarketData,
        account: MockAccount,
        orders: RecordingOrders,
        now_ms: i64,
    ) -> Harness {
        let market = Arc::new(market);
        let account = Arc::new(account);
        let orders = Arc::new(orders);
        let pending = PendingTradeSlot::new();
        let clock = PausedClock::at(now_ms);
        let scanner = MarketScanner::new(market.clone(), &ScannerConfig::default(), dec!(0.005));
        let scheduler = TradingScheduler::new(
            scanner,
            market.clone(),
            account.clone(),
            orders.clone(),
            pending.clone(),
            settings(dec!(100)),
        )
        .with_clock(clock.clone());
        Harness {
            scheduler,
            market,
            account,
            orders,
            pending,
            clock,
        }
    }

    fn funding_market() -> MockMarketData {
        MockMarketData::with(vec![
            (
                instrument("ETHUSDT", dec!(0.01), dec!(0.1), dec!(0.1)),
                Some(snapshot(dec!(-0.015), T, dec!(60))),
            ),
            (
                instrument("BTCUSDT", dec!(0.1), dec!(0.001), dec!(0.001)),
                Some(snapshot(dec!(0.008), T, dec!(60000))),
            ),
        ])
    }

    #[test]
    fn test_entry_quantity_truncates_to_step() {
        let eth = instrument("ETHUSDT", dec!(0.01), dec!(0.1), dec!(0.1));
        assert_eq!(entry_quantity(dec!(100), 10, dec!(60), &eth).unwrap(), dec!(16.6));
    }

    #[test]
    fn test_entry_quantity_clamped_to_maximum() {
        let mut eth = instrument("ETHUSDT", dec!(0.01), dec!(0.1), dec!(0.1));
        eth.max_qty = dec!(10.05);
        assert_eq!(entry_quantity(dec!(100), 10, dec!(60), &eth).unwrap(), dec!(10.0));
    }

    #[test]
    fn test_entry_quantity_below_minimum_is_fatal() {
        let btc = instrument("BTCUSDT", dec!(0.1), dec!(0.001), dec!(0.01));
        let err = entry_quantity(dec!(1), 1, dec!(60000), &btc).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));
    }

    #[test]
    fn test_entry_wake_time() {
        assert_eq!(entry_wake_time_ms(T, 0), T);
        assert_eq!(entry_wake_time_ms(T, 250), T + 250);
        assert_eq!(entry_wake_time_ms(T, 1500), T + 1500);
        assert_eq!(entry_wake_time_ms(T, -200), T - 200);
        // Off-boundary funding times snap forward to the next whole second.
        assert_eq!(entry_wake_time_ms(T + 400, 100), T + 1100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_iteration_submits_entry() {
        let h = harness(
            funding_market(),
            MockAccount::default(),
            RecordingOrders::default(),
            T - 10 * MINUTE_MS,
        );

        let first = h.scheduler.run_once().await.unwrap();
        assert_eq!(first, IterationOutcome::FundingTooFar { next_funding_time: T });
        assert!(h.clock.now_ms() >= T - ENTRY_WINDOW_MS);

        let second = h.scheduler.run_once().await.unwrap();
        assert_eq!(
            second,
            IterationOutcome::EntrySubmitted {
                symbol: "ETHUSDT".to_string(),
                side: Side::Sell,
                quantity: dec!(16.6),
            }
        );

        assert_eq!(
            h.account.leverage_calls.lock().unwrap().clone(),
            vec![("ETHUSDT".to_string(), 10)]
        );
        let orders = h.orders.submitted();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].kind, OrderKind::Market);
        assert_eq!(orders[0].side, Side::Sell);

        let pending = h.pending.current().unwrap();
        assert_eq!(pending.symbol, "ETHUSDT");
        assert_eq!(pending.stop_side(), Side::Buy);
        assert_eq!(pending.tick_size, dec!(0.01));
        assert!(pending.created_at.timestamp_millis() >= T);

        // Cooldown follows the entry.
        assert!(h.clock.now_ms() >= T + MINUTE_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_trade_blocks_new_entry() {
        let h = harness(
            funding_market(),
            MockAccount::default(),
            RecordingOrders::default(),
            T - 2 * MINUTE_MS,
        );
        let mut trade = PendingTrade::new("SOLUSDT", Side::Buy, dec!(1), dec!(0.01));
        trade.created_at = h.clock.now();
        h.pending.try_install(trade).unwrap();

        let outcome = h.scheduler.run_once().await.unwrap();

        assert_eq!(outcome, IterationOutcome::PendingTradeActive);
        assert_eq!(h.market.lookups.load(Ordering::SeqCst), 0);
        assert!(h.orders.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pending_trade_evicted() {
        let h = harness(
            MockMarketData::default(),
            MockAccount::default(),
            RecordingOrders::default(),
            T,
        );
        let mut trade = PendingTrade::new("SOLUSDT", Side::Buy, dec!(1), dec!(0.01));
        trade.created_at = h.clock.now() - chrono::Duration::minutes(11);
        h.pending.try_install(trade).unwrap();

        let outcome = h.scheduler.run_once().await.unwrap();

        assert_eq!(outcome, IterationOutcome::NoCandidates);
        assert!(!h.pending.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_sleeps_idle() {
        let market = MockMarketData::with(vec![(
            instrument("ETHUSDT", dec!(0.01), dec!(0.1), dec!(0.1)),
            Some(snapshot(dec!(0.0001), T, dec!(60))),
        )]);
        let h = harness(market, MockAccount::default(), RecordingOrders::default(), T - MINUTE_MS);

        let outcome = h.scheduler.run_once().await.unwrap();

        assert_eq!(outcome, IterationOutcome::NoCandidates);
        assert!(h.clock.now_ms() >= T + 4 * MINUTE_MS);
        assert!(h.account.leverage_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leverage_rejection_is_fatal() {
        let account = MockAccount {
            fail_leverage: true,
            ..MockAccount::default()
        };
        let h = harness(funding_market(), account, RecordingOrders::default(), T - MINUTE_MS);

        let err = h.scheduler.run_once().await.unwrap_err();
        assert!(err.to_string().contains("failed to set leverage for ETHUSDT"));
        assert!(h.orders.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_refresh_failure_restarts_iteration() {
        let h = harness(
            funding_market(),
            MockAccount::default(),
            RecordingOrders::default(),
            T - 2 * MINUTE_MS,
        );
        h.market.push_prices([None]);

        let outcome = h.scheduler.run_once().await.unwrap();

        assert_eq!(
            outcome,
            IterationOutcome::PriceUnavailable {
                symbol: "ETHUSDT".to_string()
            }
        );
        assert!(h.orders.submitted().is_empty());
        assert!(!h.pending.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_entry_clears_pending() {
        let orders = RecordingOrders {
            fail: true,
            ..RecordingOrders::default()
        };
        let h = harness(funding_market(), MockAccount::default(), orders, T - MINUTE_MS);

        let outcome = h.scheduler.run_once().await.unwrap();

        assert_eq!(
            outcome,
            IterationOutcome::EntryFailed {
                symbol: "ETHUSDT".to_string()
            }
        );
        assert!(!h.pending.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connections_checked_each_iteration() {
        let health = Arc::new(CountingHealth::default());
        let mut h = harness(
            MockMarketData::default(),
            MockAccount::default(),
            RecordingOrders::default(),
            T,
        );
        let checked: Arc<dyn ConnectionHealth> = health.clone();
        h.scheduler = h.scheduler.with_connections(vec![checked.clone(), checked]);

        h.scheduler.run_once().await.unwrap();
        assert_eq!(health.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_on_shutdown() {
        let h = harness(
            MockMarketData::default(),
            MockAccount::default(),
            RecordingOrders::default(),
            T,
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        h.scheduler.run(rx).await.unwrap();
    }
}
