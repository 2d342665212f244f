use funding_sniper_core::{
    truncate_to_step, OrderRequest, PendingTrade, ProtectiveOrderPair, Side,
};
use rust_decimal::Decimal;

/// Stop-loss and take-profit prices for a fill at `fill_price`.
///
/// A `Sell` stop side protects a long: the stop sits below the fill and the
/// target above it. A `Buy` stop side mirrors that. Both prices are truncated
/// to `tick`.
#[must_use]
pub fn protective_levels(
    fill_price: Decimal,
    stop_side: Side,
    stop_ratio: Decimal,
    take_profit_ratio: Decimal,
    tick: Decimal,
) -> ProtectiveOrderPair {
    let (stop, take_profit) = match stop_side {
        Side::Sell => (
            fill_price * (Decimal::ONE - stop_ratio),
            fill_price * (Decimal::ONE + take_profit_ratio),
        ),
        Side::Buy => (
            fill_price * (Decimal::ONE + stop_ratio),
            fill_price * (Decimal::ONE - take_profit_ratio),
        ),
    };

    ProtectiveOrderPair {
        stop_price: truncate_to_step(stop, tick),
        take_profit_price: truncate_to_step(take_profit, tick),
    }
}

/// The reduce-only take-profit and stop orders closing `trade` in full.
#[must_use]
pub fn protective_orders(trade: &PendingTrade, levels: ProtectiveOrderPair) -> [OrderRequest; 2] {
    let side = trade.stop_side();
    [
        OrderRequest::take_profit(&trade.symbol, side, trade.quantity, levels.take_profit_price),
        OrderRequest::stop_loss(&trade.symbol, side, trade.quantity, levels.stop_price),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use funding_sniper_core::OrderKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_position_levels() {
        let levels = protective_levels(dec!(100), Side::Sell, dec!(0.01), dec!(0.02), dec!(0.1));
        assert_eq!(levels.stop_price, dec!(99.0));
        assert_eq!(levels.take_profit_price, dec!(102.0));
    }

    #[test]
    fn test_short_position_levels() {
        let levels = protective_levels(dec!(100), Side::Buy, dec!(0.01), dec!(0.02), dec!(0.1));
        assert_eq!(levels.stop_price, dec!(101));
        assert_eq!(levels.take_profit_price, dec!(98));
    }

    #[test]
    fn test_levels_bracket_fill_price() {
        let fills = [dec!(0.04213), dec!(1.5), dec!(63250.7), dec!(2987.33)];
        for fill in fills {
            let long = protective_levels(fill, Side::Sell, dec!(0.005), dec!(0.01), dec!(0.00001));
            assert!(long.stop_price < fill && fill < long.take_profit_price, "fill={fill}");

            let short = protective_levels(fill, Side::Buy, dec!(0.005), dec!(0.01), dec!(0.00001));
            assert!(short.stop_price > fill && fill > short.take_profit_price, "fill={fill}");
        }
    }

    #[test]
    fn test_prices_truncate_to_tick() {
        let levels = protective_levels(dec!(2987.33), Side::Sell, dec!(0.01), dec!(0.01), dec!(0.05));
        // 2957.4567 and 3017.2033
        assert_eq!(levels.stop_price, dec!(2957.45));
        assert_eq!(levels.take_profit_price, dec!(3017.2));
    }

    #[test]
    fn test_orders_use_stop_side_and_full_quantity() {
        let trade = PendingTrade::new("SOLUSDT", Side::Sell, dec!(12.5), dec!(0.01));
        let levels = ProtectiveOrderPair {
            stop_price: dec!(151.5),
            take_profit_price: dec!(147),
        };

        let [tp, sl] = protective_orders(&trade, levels);

        assert_eq!(tp.side, Side::Buy);
        assert_eq!(tp.quantity, dec!(12.5));
        assert_eq!(tp.kind, OrderKind::ReduceOnlyLimit { price: dec!(147) });
        assert_eq!(sl.side, Side::Buy);
        assert_eq!(sl.kind, OrderKind::ReduceOnlyStop { trigger_price: dec!(151.5) });
    }
}
