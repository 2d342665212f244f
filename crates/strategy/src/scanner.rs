//! Bounded-concurrency funding-rate scan over the instrument universe.

use anyhow::{Context, Result};
use funding_sniper_core::{
    FundingSnapshot, Instrument, MarketDataGateway, RankedCandidate, ScanOutcome, ScannerConfig,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

pub struct MarketScanner {
    gateway: Arc<dyn MarketDataGateway>,
    max_concurrent: usize,
    top_n: usize,
    min_funding_rate: Decimal,
}

impl MarketScanner {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        config: &ScannerConfig,
        min_funding_rate: Decimal,
    ) -> Self {
        Self {
            gateway,
            max_concurrent: config.max_concurrent_lookups.max(1),
            top_n: config.top_n,
            min_funding_rate,
        }
    }

    /// Runs one pass: fetch the universe, look up every funding snapshot with at
    /// most `max_concurrent` requests in flight, then rank.
    ///
    /// # Errors
    ///
    /// Only a failed universe fetch is an error; individual lookup failures are
    /// logged and counted in [`ScanOutcome::lookups_failed`].
    pub async fn scan(&self, now_ms: i64) -> Result<ScanOutcome> {
        let instruments = self
            .gateway
            .list_instruments()
            .await
            .context("failed to fetch instrument universe")?;
        let instruments_scanned = instruments.len();
        debug!(instruments = instruments_scanned, limit = self.max_concurrent, "starting funding scan");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(self.max_concurrent));
        let gateway = Arc::clone(&self.gateway);

        // Admission runs on its own task so completed lookups are drained while
        // later ones are still waiting for a permit.
        let dispatcher = tokio::spawn(async move {
            for instrument in instruments {
                let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                    break;
                };
                let gateway = Arc::clone(&gateway);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = gateway.funding_snapshot(&instrument.symbol).await;
                    drop(permit);
                    let _ = tx.send((instrument, result));
                });
            }
        });

        let mut snapshots = Vec::with_capacity(instruments_scanned);
        let mut lookups_failed = 0;
        while let Some((instrument, result)) = rx.recv().await {
            match result {
                Ok(snapshot) => snapshots.push((instrument, snapshot)),
                Err(e) => {
                    lookups_failed += 1;
                    warn!(symbol = %instrument.symbol, error = %e, "funding lookup failed");
                }
            }
        }
        dispatcher.await.context("scan dispatcher panicked")?;

        let (candidates, next_funding_time) =
            rank_candidates(snapshots, now_ms, self.min_funding_rate, self.top_n);

        info!(
            scanned = instruments_scanned,
            failed = lookups_failed,
            candidates = candidates.len(),
            next_funding_time = ?next_funding_time,
            "funding scan complete"
        );

        Ok(ScanOutcome {
            candidates,
            next_funding_time,
            instruments_scanned,
            lookups_failed,
        })
    }
}

/// Ranks snapshots that share the earliest funding time after `now_ms`.
///
/// Candidates are sorted by descending absolute rate (ties keep arrival order),
/// truncated to `top_n`, and then cut at the first one below `min_rate`.
#[must_use]
pub fn rank_candidates(
    snapshots: Vec<(Instrument, FundingSnapshot)>,
    now_ms: i64,
    min_rate: Decimal,
    top_n: usize,
) -> (Vec<RankedCandidate>, Option<i64>) {
    let next_funding_time = snapshots
        .iter()
        .map(|(_, s)| s.next_funding_time)
        .filter(|t| *t > now_ms)
        .min();

    let Some(target) = next_funding_time else {
        return (Vec::new(), None);
    };

    let mut candidates: Vec<RankedCandidate> = snapshots
        .into_iter()
        .filter(|(_, s)| s.next_funding_time == target)
        .map(|(instrument, snapshot)| RankedCandidate {
            instrument,
            snapshot,
        })
        .collect();

    candidates.sort_by(|a, b| b.abs_rate().cmp(&a.abs_rate()));
    candidates.truncate(top_n);

    if let Some(cut) = candidates.iter().position(|c| c.abs_rate() < min_rate) {
        candidates.truncate(cut);
    }

    (candidates, next_funding_time)
}
