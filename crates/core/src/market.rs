use crate::events::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static trading rules for one perpetual contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub contract_type: String,
    pub quote_asset: String,
    /// Price granularity every submitted price must be a multiple of.
    pub tick_size: Decimal,
    /// Quantity granularity every submitted quantity must be a multiple of.
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}

/// Funding state of one symbol at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub mark_price: Decimal,
    /// Signed fraction; positive means longs pay shorts.
    pub funding_rate: Decimal,
    /// Epoch milliseconds of the next funding settlement.
    pub next_funding_time: i64,
}

impl FundingSnapshot {
    #[must_use]
    pub fn next_funding_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.next_funding_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub instrument: Instrument,
    pub snapshot: FundingSnapshot,
}

impl RankedCandidate {
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    #[must_use]
    pub fn abs_rate(&self) -> Decimal {
        self.snapshot.funding_rate.abs()
    }

    /// Entry direction: Buy when the funding rate is positive, Sell otherwise.
    #[must_use]
    pub fn entry_side(&self) -> Side {
        if self.snapshot.funding_rate > Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Result of one scanner pass.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// At most `top_n`, sorted by descending absolute funding rate.
    pub candidates: Vec<RankedCandidate>,
    /// Earliest funding time after "now" across every successful lookup.
    pub next_funding_time: Option<i64>,
    pub instruments_scanned: usize,
    pub lookups_failed: usize,
}

impl ScanOutcome {
    #[must_use]
    pub fn next_funding_at(&self) -> Option<DateTime<Utc>> {
        self.next_funding_time
            .and_then(DateTime::from_timestamp_millis)
    }

    #[must_use]
    pub fn top(&self) -> Option<&RankedCandidate> {
        self.candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate(rate: Decimal) -> RankedCandidate {
        RankedCandidate {
            instrument: Instrument {
                symbol: "XUSDT".to_string(),
                contract_type: "LinearPerpetual".to_string(),
                quote_asset: "USDT".to_string(),
                tick_size: dec!(0.01),
                qty_step: dec!(0.1),
                min_qty: dec!(0.1),
                max_qty: dec!(1000),
            },
            snapshot: FundingSnapshot {
                mark_price: dec!(10),
                funding_rate: rate,
                next_funding_time: 1_714_857_600_000,
            },
        }
    }

    #[test]
    fn test_entry_side_follows_rate_sign() {
        assert_eq!(candidate(dec!(0.01)).entry_side(), Side::Buy);
        assert_eq!(candidate(dec!(-0.01)).entry_side(), Side::Sell);
        assert_eq!(candidate(dec!(-0.02)).abs_rate(), dec!(0.02));
    }

    #[test]
    fn test_next_funding_at() {
        let c = candidate(dec!(0.01));
        let at = c.snapshot.next_funding_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_714_857_600_000);
    }
}
