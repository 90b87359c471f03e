//! Cross-venue arbitrage opportunities.

use crate::Exchange;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// One profitable venue pair for a symbol: buy where it trades lower, sell
/// where it trades higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub symbol: CompactString,
    pub buy_exchange: Exchange,
    pub sell_exchange: Exchange,
    pub buy_price: f64,
    pub sell_price: f64,
    /// Absolute price difference.
    pub spread: f64,
    /// Spread relative to the cheaper leg, in percent.
    pub spread_pct: f64,
    /// Gross profit estimate in percent. Equals `spread_pct`; fees are out of
    /// scope here and left to the consumer.
    pub potential_profit: f64,
}

impl ArbitrageOpportunity {
    pub fn new(
        symbol: CompactString,
        buy_exchange: Exchange,
        sell_exchange: Exchange,
        buy_price: f64,
        sell_price: f64,
    ) -> Self {
        let spread = sell_price - buy_price;
        let spread_pct = if buy_price > 0.0 {
            spread / buy_price * 100.0
        } else {
            0.0
        };
        Self {
            symbol,
            buy_exchange,
            sell_exchange,
            buy_price,
            sell_price,
            spread,
            spread_pct,
            potential_profit: spread_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opportunity_math() {
        let opp = ArbitrageOpportunity::new(
            "ETHUSDT".into(),
            Exchange::Binance,
            Exchange::Bybit,
            3000.0,
            3010.0,
        );
        assert_eq!(opp.spread, 10.0);
        assert!((opp.spread_pct - 0.3333).abs() < 0.001);
        assert_eq!(opp.potential_profit, opp.spread_pct);
    }

    #[test]
    fn test_zero_buy_price_guard() {
        let opp = ArbitrageOpportunity::new(
            "X".into(),
            Exchange::Okx,
            Exchange::Mexc,
            0.0,
            1.0,
        );
        assert_eq!(opp.spread_pct, 0.0);
    }
}
