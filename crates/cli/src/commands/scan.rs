use super::Exchange;
use anyhow::Result;
use chrono::Utc;
use funding_sniper_core::ScanOutcome;
use funding_sniper_strategy::MarketScanner;

pub async fn run(config_path: &str) -> Result<()> {
    let exchange = Exchange::connect(config_path)?;
    let scanner = MarketScanner::new(
        exchange.rest.clone(),
        &exchange.config.scanner,
        exchange.config.trading.min_funding_rate(),
    );

    let outcome = scanner.scan(Utc::now().timestamp_millis()).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ScanOutcome) {
    println!();
    println!(
        "Scanned {} instruments ({} lookups failed)",
        outcome.instruments_scanned, outcome.lookups_failed
    );
    match outcome.next_funding_at() {
        Some(at) => println!("Next funding: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Next funding: none found"),
    }

    if outcome.candidates.is_empty() {
        println!("No candidates above the funding-rate threshold.");
        return;
    }

    println!();
    println!("{:<4} {:<16} {:>12} {:>16} {:>6}", "#", "SYMBOL", "RATE %", "MARK", "SIDE");
    println!("{}", "-".repeat(58));
    for (rank, candidate) in outcome.candidates.iter().enumerate() {
        let rate_pct = candidate.snapshot.funding_rate * rust_decimal::Decimal::ONE_HUNDRED;
        println!(
            "{:<4} {:<16} {:>12} {:>16} {:>6}",
            rank + 1,
            candidate.symbol(),
            rate_pct.round_dp(4).to_string(),
            candidate.snapshot.mark_price.to_string(),
            candidate.entry_side().as_str(),
        );
    }
}
