//! BitMEX realtime dialect.
//!
//! BitMEX publishes trades and top-of-book on separate tables. The codec
//! caches the newest trade price per ticker and uses it as `last` when a
//! quote arrives, falling back to the mid when no trade was seen yet.

use super::{positive, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use chrono::DateTime;
use rtd_core::Exchange;
use serde_json::Value;
use std::collections::HashMap;

pub struct BitmexCodec {
    last_trade: HashMap<String, f64>,
}

impl BitmexCodec {
    pub fn new() -> Self {
        Self {
            last_trade: HashMap::new(),
        }
    }

    /// ISO-8601 venue timestamp ("2023-11-14T22:13:20.123Z") to milliseconds.
    fn parse_timestamp(value: &Value) -> u64 {
        value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp_millis().max(0) as u64)
            .unwrap_or(0)
    }

    fn decode_quotes(&self, msg: &Value) -> DecodeOutcome {
        let Some(rows) = msg["data"].as_array() else {
            return DecodeOutcome::Ignore;
        };

        let mut quotes = Vec::new();
        for row in rows {
            let Some(native_ticker) = row["symbol"].as_str() else {
                continue;
            };
            let (Some(bid), Some(ask)) =
                (positive(&row["bidPrice"]), positive(&row["askPrice"]))
            else {
                continue;
            };
            let last = self
                .last_trade
                .get(native_ticker)
                .copied()
                .unwrap_or((bid + ask) / 2.0);
            quotes.push(RawQuote {
                native_ticker: native_ticker.to_string(),
                last,
                bid: Some(bid),
                ask: Some(ask),
                exchange_ts_ms: Self::parse_timestamp(&row["timestamp"]),
            });
        }

        if quotes.is_empty() {
            DecodeOutcome::Ignore
        } else {
            DecodeOutcome::Quotes(quotes)
        }
    }

    fn cache_trades(&mut self, msg: &Value) {
        let Some(rows) = msg["data"].as_array() else {
            return;
        };
        for row in rows {
            if let (Some(symbol), Some(price)) =
                (row["symbol"].as_str(), positive(&row["price"]))
            {
                self.last_trade.insert(symbol.to_string(), price);
            }
        }
    }
}

impl Default for BitmexCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for BitmexCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Bitmex
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://ws.bitmex.com/realtime".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"subscribe","args":["quote:{native_ticker}","trade:{native_ticker}"]}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"unsubscribe","args":["quote:{native_ticker}","trade:{native_ticker}"]}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        Some(r#"{"op":"ping"}"#.to_string())
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        if raw == "pong" {
            return DecodeOutcome::Heartbeat;
        }
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        if msg.get("success").and_then(Value::as_bool) == Some(true) {
            if let Some(channel) = msg.get("subscribe").and_then(Value::as_str) {
                return DecodeOutcome::Ack(AckRef::Ticker(channel.to_string()));
            }
            return DecodeOutcome::Ignore;
        }

        if let Some(error) = msg.get("error").and_then(Value::as_str) {
            // Auth rejections on this public stream cannot be retried into
            // success; everything else is a transient protocol complaint.
            let is_fatal = error.to_ascii_lowercase().contains("auth");
            return DecodeOutcome::Error {
                message: error.to_string(),
                is_fatal,
            };
        }

        // Server banner on connect.
        if msg.get("info").is_some() {
            return DecodeOutcome::Ignore;
        }

        match msg.get("table").and_then(Value::as_str) {
            Some("quote") => self.decode_quotes(&msg),
            Some("trade") => {
                self.cache_trades(&msg);
                DecodeOutcome::Ignore
            }
            _ => DecodeOutcome::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_covers_quote_and_trade() {
        let mut codec = BitmexCodec::new();
        let frame = codec.subscribe_frame("XBTUSD").unwrap();
        assert!(frame.contains("quote:XBTUSD"));
        assert!(frame.contains("trade:XBTUSD"));
    }

    #[test]
    fn test_quote_uses_mid_before_any_trade() {
        let mut codec = BitmexCodec::new();
        let raw = r#"{"table":"quote","action":"insert","data":[{"symbol":"XBTUSD","bidPrice":59998.0,"askPrice":60002.0,"timestamp":"2023-11-14T22:13:20.123Z"}]}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].last, 60000.0);
        assert_eq!(quotes[0].exchange_ts_ms, 1_700_000_000_123);
    }

    #[test]
    fn test_quote_uses_cached_trade_price() {
        let mut codec = BitmexCodec::new();
        let trade = r#"{"table":"trade","action":"insert","data":[{"symbol":"XBTUSD","price":60001.5,"size":100}]}"#;
        assert_eq!(codec.decode(trade), DecodeOutcome::Ignore);

        let quote = r#"{"table":"quote","data":[{"symbol":"XBTUSD","bidPrice":59998.0,"askPrice":60002.0,"timestamp":"2023-11-14T22:13:21Z"}]}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(quote) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].last, 60001.5);
        assert_eq!(quotes[0].bid, Some(59998.0));
    }

    #[test]
    fn test_trade_cache_is_per_ticker() {
        let mut codec = BitmexCodec::new();
        codec.decode(r#"{"table":"trade","data":[{"symbol":"ETHUSD","price":3000.0}]}"#);

        let quote = r#"{"table":"quote","data":[{"symbol":"XBTUSD","bidPrice":59998.0,"askPrice":60002.0,"timestamp":"2023-11-14T22:13:21Z"}]}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(quote) else {
            panic!("expected quotes");
        };
        // ETHUSD trade must not leak into the XBTUSD quote.
        assert_eq!(quotes[0].last, 60000.0);
    }

    #[test]
    fn test_decode_ack() {
        let mut codec = BitmexCodec::new();
        let outcome = codec.decode(r#"{"success":true,"subscribe":"quote:XBTUSD","request":{"op":"subscribe"}}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Ack(AckRef::Ticker("quote:XBTUSD".to_string()))
        );
    }

    #[test]
    fn test_bad_timestamp_normalizes_to_zero() {
        let mut codec = BitmexCodec::new();
        let raw = r#"{"table":"quote","data":[{"symbol":"XBTUSD","bidPrice":1.0,"askPrice":2.0,"timestamp":"not-a-date"}]}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].exchange_ts_ms, 0);
    }

    #[test]
    fn test_auth_error_is_fatal() {
        let mut codec = BitmexCodec::new();
        let outcome = codec.decode(r#"{"error":"Authentication required for this topic"}"#);
        assert!(matches!(outcome, DecodeOutcome::Error { is_fatal: true, .. }));
    }
}
