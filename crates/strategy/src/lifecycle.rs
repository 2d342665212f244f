//! Reacts to fill notifications: attaches protective orders to the pending
//! entry and optionally runs the breakeven watch.

use crate::breakeven::{run_breakeven_watch, BreakevenWatch};
use crate::protective::{protective_levels, protective_orders};
use funding_sniper_core::{
    AppConfig, BreakevenConfig, MarketDataGateway, OrderGateway, OrderUpdate, PendingTradeSlot,
    ProtectiveOrderPair, StreamEvent,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub stop_ratio: Decimal,
    pub take_profit_ratio: Decimal,
    pub breakeven: BreakevenConfig,
}

impl LifecycleSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stop_ratio: config.trading.stop_ratio(),
            take_profit_ratio: config.trading.take_profit_ratio(),
            breakeven: config.breakeven.clone(),
        }
    }
}

pub struct LifecycleCoordinator {
    pending: PendingTradeSlot,
    orders: Arc<dyn OrderGateway>,
    market: Arc<dyn MarketDataGateway>,
    settings: LifecycleSettings,
    /// Protective submissions and breakeven watches; aborted on shutdown.
    tasks: JoinSet<()>,
}

impl LifecycleCoordinator {
    #[must_use]
    pub fn new(
        pending: PendingTradeSlot,
        orders: Arc<dyn OrderGateway>,
        market: Arc<dyn MarketDataGateway>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            pending,
            orders,
            market,
            settings,
            tasks: JoinSet::new(),
        }
    }

    /// Handles one order update from the fill feed.
    ///
    /// Only a filled market order for the pending symbol with exactly the
    /// pending quantity is acted on. The pending trade is cleared before any
    /// protective order is spawned, so a duplicate fill can never attach a
    /// second pair.
    pub fn handle_update(&mut self, update: &OrderUpdate) -> Option<ProtectiveOrderPair> {
        let Some(pending) = self.pending.current() else {
            debug!(symbol = %update.symbol, "no pending trade; ignoring order update");
            return None;
        };

        if !update.is_filled_market() {
            debug!(
                symbol = %update.symbol,
                order_type = ?update.order_type,
                status = ?update.status,
                "ignoring non-fill order update"
            );
            return None;
        }

        if update.symbol != pending.symbol {
            warn!(expected = %pending.symbol, actual = %update.symbol, "fill for unexpected symbol");
            return None;
        }

        if update.quantity != pending.quantity {
            warn!(
                symbol = %update.symbol,
                expected = %pending.quantity,
                actual = %update.quantity,
                "fill quantity does not match pending trade"
            );
            return None;
        }

        let Some(fill_price) = update.avg_price.filter(|p| *p > Decimal::ZERO) else {
            warn!(symbol = %update.symbol, raw = ?update.avg_price, "fill without usable average price");
            return None;
        };

        let trade = self
            .pending
            .take_if(|t| t.symbol == update.symbol && t.quantity == update.quantity)?;

        let levels = protective_levels(
            fill_price,
            trade.stop_side(),
            self.settings.stop_ratio,
            self.settings.take_profit_ratio,
            trade.tick_size,
        );
        info!(
            symbol = %trade.symbol,
            fill = %fill_price,
            stop = %levels.stop_price,
            take_profit = %levels.take_profit_price,
            "entry filled; attaching protective orders"
        );

        for order in protective_orders(&trade, levels) {
            let orders = Arc::clone(&self.orders);
            self.tasks.spawn(async move {
                let symbol = order.symbol.clone();
                let kind = order.kind.clone();
                if let Err(e) = orders.submit(order).await {
                    error!(%symbol, ?kind, error = %e, "failed to submit protective order");
                }
            });
        }

        let breakeven = &self.settings.breakeven;
        if breakeven.enabled {
            let watch = BreakevenWatch::new(
                fill_price,
                trade.stop_side(),
                breakeven.percent,
                trade.tick_size,
                breakeven.window_size,
                breakeven.place_duration,
            );
            self.tasks.spawn({
                let market = Arc::clone(&self.market);
                let orders = Arc::clone(&self.orders);
                let interval = Duration::from_millis(breakeven.poll_interval_ms);
                async move {
                    run_breakeven_watch(watch, trade.symbol, trade.quantity, market, orders, interval)
                        .await;
                }
            });
        }

        Some(levels)
    }

    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every spawned submission and watch to finish.
    pub async fn join_all(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_join_error(result);
        }
    }

    /// Consumes fill-feed events until the channel closes or `shutdown` fires,
    /// then aborts any outstanding tasks.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("lifecycle coordinator started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(StreamEvent::OrderUpdate(update)) => {
                        self.handle_update(&update);
                    }
                    Some(StreamEvent::Connected) => info!("fill feed connected"),
                    Some(StreamEvent::Disconnected { reason }) => {
                        warn!(%reason, "fill feed disconnected");
                    }
                    None => {
                        warn!("fill feed event channel closed");
                        break;
                    }
                },
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_join_error(result);
                }
            }
        }

        self.tasks.shutdown().await;
        info!("lifecycle coordinator stopped");
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "lifecycle task panicked");
        }
    }
}
