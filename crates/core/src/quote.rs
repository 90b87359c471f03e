//! The canonical quote record produced by every venue codec.

use crate::Exchange;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Latest known futures quote for one symbol on one venue.
///
/// `display_symbol` is the operator-facing symbol (`BTCUSDT`), unique across the
/// system; `native_ticker` is whatever the venue spoke on the wire
/// (`BTC-PERPETUAL`, `XBTUSD`, ...) and is kept for debugging and
/// re-subscription. `last` is always positive; `bid`/`ask` are present only when
/// the venue published a top-of-book and are positive when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub exchange: Exchange,
    pub display_symbol: CompactString,
    pub native_ticker: CompactString,
    /// Last/mid/mark price. Mid of top-of-book when the venue sends only levels.
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    /// Venue-reported timestamp in milliseconds, 0 when the venue sends none.
    pub exchange_ts_ms: u64,
    /// Local receive time in milliseconds. Always set.
    pub recv_ts_ms: u64,
}

impl Quote {
    /// Best available event time: the venue's own stamp when it sent one,
    /// otherwise the local receive time.
    pub fn timestamp_ms(&self) -> u64 {
        if self.exchange_ts_ms > 0 {
            self.exchange_ts_ms
        } else {
            self.recv_ts_ms
        }
    }

    /// Mid price, when both sides of the book are known.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn quote() -> Quote {
        Quote {
            exchange: Exchange::Binance,
            display_symbol: "BTCUSDT".into(),
            native_ticker: "BTCUSDT".into(),
            last: 60000.0,
            bid: Some(59999.0),
            ask: Some(60001.0),
            exchange_ts_ms: 1000,
            recv_ts_ms: 2000,
        }
    }

    #[test]
    fn test_timestamp_prefers_exchange_stamp() {
        assert_eq!(quote().timestamp_ms(), 1000);

        let mut q = quote();
        q.exchange_ts_ms = 0;
        assert_eq!(q.timestamp_ms(), 2000);
    }

    #[test]
    fn test_mid() {
        assert_eq!(quote().mid(), Some(60000.0));

        let mut q = quote();
        q.ask = None;
        assert_eq!(q.mid(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(quote()).unwrap();
        assert_eq!(json["exchange"], "binance");
        assert_eq!(json["display_symbol"], "BTCUSDT");
        assert_eq!(json["bid"], 59999.0);
    }
}
