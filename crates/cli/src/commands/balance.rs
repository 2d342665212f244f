use super::Exchange;
use anyhow::{Context, Result};

pub async fn run(config_path: &str) -> Result<()> {
    let exchange = Exchange::connect(config_path)?;
    let equity = exchange
        .rest
        .wallet_equity()
        .await
        .context("failed to query wallet balance")?;

    let margin = exchange.config.trading.margin;
    println!();
    println!("Environment: {:?}", exchange.config.environment);
    println!("Equity:      {equity} USDT");
    println!("Margin:      {margin} USDT per trade");
    println!("Trades:      {}", (equity / margin).trunc());
    Ok(())
}
