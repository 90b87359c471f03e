//! CoinDCX polled REST dialect.
//!
//! CoinDCX exposes no usable public stream, so this codec is driven by
//! periodic fetches of the full tickers endpoint. Subscription frames are
//! no-ops that maintain the market filter; only filtered markets whose price
//! moved at least 0.01% since the last emission produce quotes.

use super::{num, positive, ts_ms_auto, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const TICKER_URL: &str = "https://public.coindcx.com/exchange/ticker";
const POLL_CADENCE: Duration = Duration::from_secs(4);
/// Minimum relative price move before a market is re-emitted.
const MIN_MOVE_PCT: f64 = 0.01;

pub struct CoindcxCodec {
    markets: HashSet<String>,
    last_emitted: HashMap<String, f64>,
}

impl CoindcxCodec {
    pub fn new() -> Self {
        Self {
            markets: HashSet::new(),
            last_emitted: HashMap::new(),
        }
    }

    fn moved_enough(&self, market: &str, last: f64) -> bool {
        match self.last_emitted.get(market) {
            None => true,
            Some(&prev) if prev <= 0.0 => true,
            Some(&prev) => (last - prev).abs() / prev * 100.0 >= MIN_MOVE_PCT,
        }
    }

    fn row_quote(row: &Value) -> Option<(String, RawQuote)> {
        let market = row["market"].as_str()?;
        let last = positive(&row["last_price"])?;
        let bid = num(&row["bid"]).filter(|v| *v > 0.0);
        let ask = num(&row["ask"]).filter(|v| *v > 0.0);
        Some((
            market.to_string(),
            RawQuote {
                native_ticker: market.to_string(),
                last,
                bid,
                ask,
                exchange_ts_ms: ts_ms_auto(&row["timestamp"]),
            },
        ))
    }
}

impl Default for CoindcxCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for CoindcxCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Coindcx
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Poll {
            url: TICKER_URL.to_string(),
            cadence: POLL_CADENCE,
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        self.markets.insert(native_ticker.to_string());
        None
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        self.markets.remove(native_ticker);
        self.last_emitted.remove(native_ticker);
        None
    }

    fn acks_subscriptions(&self) -> bool {
        false
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(payload) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };
        let Some(rows) = payload.as_array() else {
            return DecodeOutcome::Ignore;
        };

        let mut quotes = Vec::new();
        for row in rows {
            let Some((market, quote)) = Self::row_quote(row) else {
                continue;
            };
            if !self.markets.contains(&market) {
                continue;
            }
            if !self.moved_enough(&market, quote.last) {
                continue;
            }
            self.last_emitted.insert(market, quote.last);
            quotes.push(quote);
        }

        if quotes.is_empty() {
            DecodeOutcome::Ignore
        } else {
            DecodeOutcome::Quotes(quotes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(price: &str) -> String {
        format!(
            r#"[{{"market":"BTCUSDT","last_price":"{price}","bid":"59999.0","ask":"60001.0","timestamp":1700000000}},{{"market":"ETHUSDT","last_price":"3000.0","timestamp":1700000000}}]"#
        )
    }

    #[test]
    fn test_subscribe_is_noop_frame_with_filter() {
        let mut codec = CoindcxCodec::new();
        assert_eq!(codec.subscribe_frame("BTCUSDT"), None);
        assert!(!codec.acks_subscriptions());

        let DecodeOutcome::Quotes(quotes) = codec.decode(&payload("60000.0")) else {
            panic!("expected quotes");
        };
        // ETHUSDT is present in the payload but was never subscribed.
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].native_ticker, "BTCUSDT");
        assert_eq!(quotes[0].bid, Some(59999.0));
        assert_eq!(quotes[0].exchange_ts_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_change_detection_suppresses_static_prices() {
        let mut codec = CoindcxCodec::new();
        codec.subscribe_frame("BTCUSDT");

        assert!(matches!(
            codec.decode(&payload("60000.0")),
            DecodeOutcome::Quotes(_)
        ));
        // Same price again: below the 0.01% move threshold.
        assert_eq!(codec.decode(&payload("60000.0")), DecodeOutcome::Ignore);
        // 0.001% move: still suppressed.
        assert_eq!(codec.decode(&payload("60000.6")), DecodeOutcome::Ignore);
        // 0.01% move: emitted.
        assert!(matches!(
            codec.decode(&payload("60006.0")),
            DecodeOutcome::Quotes(_)
        ));
    }

    #[test]
    fn test_unsubscribe_clears_filter_and_cache() {
        let mut codec = CoindcxCodec::new();
        codec.subscribe_frame("BTCUSDT");
        codec.decode(&payload("60000.0"));

        codec.unsubscribe_frame("BTCUSDT");
        assert_eq!(codec.decode(&payload("60006.0")), DecodeOutcome::Ignore);
    }

    #[test]
    fn test_missing_book_sides_stay_absent() {
        let mut codec = CoindcxCodec::new();
        codec.subscribe_frame("ETHUSDT");
        let raw = r#"[{"market":"ETHUSDT","last_price":"3000.0","timestamp":1700000000}]"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].bid, None);
        assert_eq!(quotes[0].ask, None);
    }

    #[test]
    fn test_non_array_payload_ignored() {
        let mut codec = CoindcxCodec::new();
        assert_eq!(codec.decode(r#"{"status":"maintenance"}"#), DecodeOutcome::Ignore);
    }
}
