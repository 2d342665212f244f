//! Debounced breakeven stop: once price has held beyond the fill by a margin
//! for `window` consecutive polls, the stop is moved to that level.

use funding_sniper_core::{truncate_to_step, MarketDataGateway, OrderGateway, OrderRequest, Side};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStep {
    Waiting,
    /// The condition held for the full window; place a stop at this price.
    Trigger(Decimal),
    /// The poll budget ran out without triggering.
    Expired,
}

#[derive(Debug, Clone)]
pub struct BreakevenWatch {
    cost: Decimal,
    stop_side: Side,
    window: u32,
    countdown: u32,
    polls_left: u32,
}

impl BreakevenWatch {
    /// `percent` is a raw multiplier of `fill_price`; the offset is truncated to
    /// `tick` and applied in the position's favorable direction.
    #[must_use]
    pub fn new(
        fill_price: Decimal,
        stop_side: Side,
        percent: Decimal,
        tick: Decimal,
        window: u32,
        max_polls: u32,
    ) -> Self {
        let offset = truncate_to_step(fill_price * percent, tick);
        let delta = match stop_side {
            Side::Buy => -offset,
            Side::Sell => offset,
        };
        let window = window.max(1);

        Self {
            cost: fill_price + delta,
            stop_side,
            window,
            countdown: window,
            polls_left: max_polls,
        }
    }

    #[must_use]
    pub const fn cost(&self) -> Decimal {
        self.cost
    }

    #[must_use]
    pub const fn stop_side(&self) -> Side {
        self.stop_side
    }

    #[must_use]
    pub const fn countdown(&self) -> u32 {
        self.countdown
    }

    fn is_favorable(&self, price: Decimal) -> bool {
        match self.stop_side {
            Side::Buy => price < self.cost,
            Side::Sell => price > self.cost,
        }
    }

    /// Feeds one polled price.
    pub fn observe(&mut self, price: Decimal) -> WatchStep {
        if self.polls_left == 0 {
            return WatchStep::Expired;
        }
        self.polls_left -= 1;

        if self.is_favorable(price) {
            self.countdown -= 1;
            if self.countdown == 0 {
                return WatchStep::Trigger(self.cost);
            }
        } else {
            self.countdown = self.window;
        }

        self.remaining()
    }

    /// Consumes one poll whose price could not be fetched; the countdown is
    /// left as is.
    pub fn skip(&mut self) -> WatchStep {
        if self.polls_left == 0 {
            return WatchStep::Expired;
        }
        self.polls_left -= 1;
        self.remaining()
    }

    const fn remaining(&self) -> WatchStep {
        if self.polls_left == 0 {
            WatchStep::Expired
        } else {
            WatchStep::Waiting
        }
    }
}

/// Polls the mark price of `symbol` every `poll_interval` (the first poll is
/// immediate) until the watch triggers or expires.
///
/// Returns the replacement stop price when one was submitted.
pub async fn run_breakeven_watch(
    mut watch: BreakevenWatch,
    symbol: String,
    quantity: Decimal,
    market: Arc<dyn MarketDataGateway>,
    orders: Arc<dyn OrderGateway>,
    poll_interval: Duration,
) -> Option<Decimal> {
    info!(%symbol, cost = %watch.cost(), "breakeven watch started");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let step = match market.mark_price(&symbol).await {
            Ok(price) => {
                let step = watch.observe(price);
                debug!(%symbol, %price, countdown = watch.countdown(), "breakeven poll");
                step
            }
            Err(e) => {
                warn!(%symbol, error = %e, "breakeven price poll failed");
                watch.skip()
            }
        };

        match step {
            WatchStep::Waiting => {}
            WatchStep::Expired => {
                info!(%symbol, "breakeven watch expired; original stop stays in force");
                return None;
            }
            WatchStep::Trigger(cost) => {
                let order = OrderRequest::stop_loss(&symbol, watch.stop_side(), quantity, cost);
                return match orders.submit(order).await {
                    Ok(()) => {
                        info!(%symbol, stop = %cost, "breakeven stop submitted");
                        Some(cost)
                    }
                    Err(e) => {
                        error!(%symbol, stop = %cost, error = %e, "failed to submit breakeven stop");
                        None
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{instrument, snapshot, MockMarketData, RecordingOrders};
    use funding_sniper_core::OrderKind;
    use rust_decimal_macros::dec;

    fn long_watch(window: u32, max_polls: u32) -> BreakevenWatch {
        BreakevenWatch::new(dec!(100), Side::Sell, dec!(0.01), dec!(0.1), window, max_polls)
    }

    #[test]
    fn test_cost_moves_in_favorable_direction() {
        assert_eq!(long_watch(3, 10).cost(), dec!(101));

        let short = BreakevenWatch::new(dec!(100), Side::Buy, dec!(0.01), dec!(0.1), 3, 10);
        assert_eq!(short.cost(), dec!(99));

        let truncated = BreakevenWatch::new(dec!(3.337), Side::Sell, dec!(0.002), dec!(0.001), 1, 1);
        // 3.337 * 0.002 = 0.006674
        assert_eq!(truncated.cost(), dec!(3.343));
    }

    #[test]
    fn test_single_favorable_poll_does_not_trigger() {
        let mut watch = long_watch(3, 10);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(100.5)), WatchStep::Waiting);
        assert_eq!(watch.countdown(), 3);

        assert_eq!(watch.observe(dec!(101.1)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(101.2)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(101.3)), WatchStep::Trigger(dec!(101)));
    }

    #[test]
    fn test_price_at_cost_resets() {
        let mut watch = long_watch(2, 10);
        watch.observe(dec!(105));
        assert_eq!(watch.countdown(), 1);
        watch.observe(dec!(101));
        assert_eq!(watch.countdown(), 2);
    }

    #[test]
    fn test_short_side_triggers_below_cost() {
        let mut watch = BreakevenWatch::new(dec!(100), Side::Buy, dec!(0.01), dec!(0.1), 2, 10);
        assert_eq!(watch.observe(dec!(98)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(98.9)), WatchStep::Trigger(dec!(99)));
    }

    #[test]
    fn test_expires_after_poll_budget() {
        let mut watch = long_watch(3, 4);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Waiting);
        assert_eq!(watch.skip(), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Waiting);
        assert_eq!(watch.observe(dec!(90)), WatchStep::Expired);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Expired);
    }

    #[test]
    fn test_failed_poll_keeps_countdown() {
        let mut watch = long_watch(2, 10);
        watch.observe(dec!(102));
        watch.skip();
        assert_eq!(watch.countdown(), 1);
        assert_eq!(watch.observe(dec!(102)), WatchStep::Trigger(dec!(101)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_submits_replacement_stop() {
        let market = Arc::new(MockMarketData::with(vec![(
            instrument("BTCUSDT", dec!(0.1), dec!(0.001), dec!(0.001)),
            Some(snapshot(dec!(0.01), 0, dec!(100))),
        )]));
        market.push_prices([Some(dec!(102)), None, Some(dec!(103))]);
        let orders = Arc::new(RecordingOrders::default());

        let start = tokio::time::Instant::now();
        let placed = run_breakeven_watch(
            long_watch(2, 10),
            "BTCUSDT".to_string(),
            dec!(0.5),
            market,
            orders.clone(),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(placed, Some(dec!(101)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        let submitted = orders.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, Side::Sell);
        assert_eq!(submitted[0].quantity, dec!(0.5));
        assert_eq!(submitted[0].kind, OrderKind::ReduceOnlyStop { trigger_price: dec!(101) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_expires_without_order() {
        let market = Arc::new(MockMarketData::with(vec![(
            instrument("BTCUSDT", dec!(0.1), dec!(0.001), dec!(0.001)),
            Some(snapshot(dec!(0.01), 0, dec!(100))),
        )]));
        let orders = Arc::new(RecordingOrders::default());

        let placed = run_breakeven_watch(
            long_watch(2, 5),
            "BTCUSDT".to_string(),
            dec!(0.5),
            market,
            orders.clone(),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(placed, None);
        assert!(orders.submitted().is_empty());
    }
}
