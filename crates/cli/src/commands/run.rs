//! The `run` subcommand: startup checks, connection wiring and the trading loop.

use super::Exchange;
use anyhow::{bail, Context, Result};
use funding_sniper_bybit::{StreamConnection, StreamEvent, StreamRole, StreamSettings};
use funding_sniper_core::{
    AccountGateway, ConnectionHealth, MarketDataGateway, OrderGateway, PendingTradeSlot,
};
use funding_sniper_strategy::{
    LifecycleCoordinator, LifecycleSettings, MarketScanner, SchedulerSettings, TradingScheduler,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const STARTUP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(config_path: &str) -> Result<()> {
    info!(config = %config_path, "starting funding sniper");
    let exchange = Exchange::connect(config_path)?;
    let config = &exchange.config;

    check_balance(exchange.rest.as_ref(), config.trading.margin).await?;
    exchange
        .rest
        .set_margin_mode(config.trading.margin_type)
        .await
        .with_context(|| format!("failed to set margin mode {}", config.trading.margin_type.as_api_str()))?;

    let (order_conn, order_events) = StreamConnection::connect(
        StreamSettings::new(StreamRole::Order, &exchange.endpoints.trade_ws_url, &config.connection),
        Arc::clone(&exchange.signer),
    );
    let (fill_conn, fill_events) = StreamConnection::connect(
        StreamSettings::new(
            StreamRole::FillFeed,
            &exchange.endpoints.private_ws_url,
            &config.connection,
        ),
        Arc::clone(&exchange.signer),
    );

    let connected = async {
        order_conn.wait_until_active(STARTUP_CONNECT_TIMEOUT).await?;
        fill_conn.wait_until_active(STARTUP_CONNECT_TIMEOUT).await
    };
    if let Err(e) = connected.await {
        order_conn.shutdown().await;
        fill_conn.shutdown().await;
        return Err(e.context("streaming connections failed to start"));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pending = PendingTradeSlot::new();
    let market: Arc<dyn MarketDataGateway> = exchange.rest.clone();
    let orders: Arc<dyn OrderGateway> = Arc::new(order_conn.clone());

    let coordinator = LifecycleCoordinator::new(
        pending.clone(),
        Arc::clone(&orders),
        Arc::clone(&market),
        LifecycleSettings::from_config(config),
    );
    let lifecycle = tokio::spawn(coordinator.run(fill_events, shutdown_rx.clone()));
    let order_log = tokio::spawn(log_order_events(order_events));

    let connections: Vec<Arc<dyn ConnectionHealth>> =
        vec![Arc::new(order_conn.clone()), Arc::new(fill_conn.clone())];
    let scanner = MarketScanner::new(
        Arc::clone(&market),
        &config.scanner,
        config.trading.min_funding_rate(),
    );
    let scheduler = TradingScheduler::new(
        scanner,
        market,
        exchange.rest.clone(),
        orders,
        pending,
        SchedulerSettings::from_config(config),
    )
    .with_connections(connections);

    let result = tokio::select! {
        result = scheduler.run(shutdown_rx) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = lifecycle.await {
        error!(error = %e, "lifecycle coordinator task failed");
    }
    order_conn.shutdown().await;
    fill_conn.shutdown().await;
    order_log.abort();

    if let Err(e) = &result {
        error!(error = %e, "fatal error, exiting");
    }
    info!("funding sniper stopped");
    result
}

/// Startup balance gate: an unreadable balance is tolerated, one below the
/// per-trade margin is not.
async fn check_balance(account: &dyn AccountGateway, margin: Decimal) -> Result<()> {
    match account.wallet_balance().await {
        Ok(balance) => {
            if balance < margin {
                bail!("insufficient balance: {balance} USDT available, {margin} USDT margin required");
            }
            let trades = (balance / margin).trunc();
            info!(%balance, %margin, %trades, "wallet balance checked");
        }
        Err(e) => {
            warn!(error = %e, "failed to query wallet balance; skipping balance check");
        }
    }
    Ok(())
}

async fn log_order_events(mut events: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Connected => info!("order connection ready"),
            StreamEvent::Disconnected { reason } => warn!(%reason, "order connection lost"),
            StreamEvent::OrderUpdate(update) => {
                info!(symbol = %update.symbol, status = ?update.status, "order update on order connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use funding_sniper_core::MarginMode;
    use rust_decimal_macros::dec;

    struct FixedBalance(Option<Decimal>);

    #[async_trait]
    impl AccountGateway for FixedBalance {
        async fn wallet_balance(&self) -> Result<Decimal> {
            self.0.ok_or_else(|| anyhow::anyhow!("HTTP 503"))
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<()> {
            Ok(())
        }

        async fn set_margin_mode(&self, _mode: MarginMode) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_balance_below_margin_is_fatal() {
        let err = check_balance(&FixedBalance(Some(dec!(40))), dec!(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient balance"));
    }

    #[tokio::test]
    async fn test_balance_sufficient() {
        assert!(check_balance(&FixedBalance(Some(dec!(250))), dec!(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_balance_query_failure_is_tolerated() {
        assert!(check_balance(&FixedBalance(None), dec!(50)).await.is_ok());
    }
}
