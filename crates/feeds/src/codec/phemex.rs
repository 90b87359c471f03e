//! Phemex orderbook dialect.
//!
//! Phemex transmits prices as scaled integers. Each symbol has a documented
//! scale factor; unknown symbols fall back to the default. A price that scales
//! to zero invalidates the frame.

use super::{AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_SCALE: f64 = 10_000.0;

pub struct PhemexCodec {
    request_id: u64,
    scale_factors: HashMap<&'static str, f64>,
}

impl PhemexCodec {
    pub fn new() -> Self {
        let scale_factors = HashMap::from([
            ("BTCUSD", 10_000.0),
            ("ETHUSD", 10_000.0),
            ("XRPUSD", 100_000_000.0),
            ("ADAUSD", 100_000_000.0),
        ]);
        Self {
            request_id: 1,
            scale_factors,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn scale_for(&self, native_ticker: &str) -> f64 {
        self.scale_factors
            .get(native_ticker)
            .copied()
            .unwrap_or(DEFAULT_SCALE)
    }

    /// Best level of one side, skipping qty-0 delete levels.
    fn best_level(side: &Value) -> Option<f64> {
        side.as_array()?
            .iter()
            .filter_map(Value::as_array)
            .find(|level| {
                level.len() >= 2 && level[1].as_f64().is_some_and(|qty| qty > 0.0)
            })
            .and_then(|level| level[0].as_f64())
    }

    fn decode_book(&self, msg: &Value) -> DecodeOutcome {
        let Some(native_ticker) = msg["symbol"].as_str() else {
            return DecodeOutcome::Ignore;
        };
        let book = &msg["book"];

        let (Some(bid_raw), Some(ask_raw)) =
            (Self::best_level(&book["bids"]), Self::best_level(&book["asks"]))
        else {
            return DecodeOutcome::Ignore;
        };

        let scale = self.scale_for(native_ticker);
        let bid = bid_raw / scale;
        let ask = ask_raw / scale;
        if bid <= 0.0 || ask <= 0.0 {
            return DecodeOutcome::Ignore;
        }

        // Phemex stamps in nanoseconds.
        let ts_ns = msg["timestamp"].as_u64().unwrap_or(0);
        DecodeOutcome::quote(RawQuote {
            native_ticker: native_ticker.to_string(),
            last: (bid + ask) / 2.0,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ns / 1_000_000,
        })
    }
}

impl Default for PhemexCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for PhemexCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Phemex
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://ws.phemex.com".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"id":{id},"method":"orderbook.subscribe","params":["{native_ticker}",20]}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"id":{id},"method":"orderbook.unsubscribe","params":["{native_ticker}"]}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(r#"{{"id":{id},"method":"server.ping","params":[]}}"#))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        if let Some(error) = msg.get("error") {
            if !error.is_null() {
                return DecodeOutcome::Error {
                    message: error["message"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                    is_fatal: false,
                };
            }
        }

        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            let result = &msg["result"];
            if result["status"].as_str() == Some("success") {
                return DecodeOutcome::Ack(AckRef::RequestId(id));
            }
            if result.as_str() == Some("pong") {
                return DecodeOutcome::Heartbeat;
            }
        }

        if msg.get("book").is_some() && msg.get("symbol").is_some() {
            return self.decode_book(&msg);
        }

        DecodeOutcome::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = PhemexCodec::new();
        let frame = codec.subscribe_frame("BTCUSD").unwrap();
        assert!(frame.contains("orderbook.subscribe"));
        assert!(frame.contains(r#"["BTCUSD",20]"#));
    }

    #[test]
    fn test_scaled_decode() {
        let mut codec = PhemexCodec::new();
        // Scale 10_000: 600010000 -> 60001, 600030000 -> 60003.
        let raw = r#"{"book":{"asks":[[600030000,4500]],"bids":[[600010000,2000]]},"depth":20,"sequence":1,"symbol":"BTCUSD","timestamp":1700000000123456789,"type":"snapshot"}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        let q = &quotes[0];
        assert_eq!(q.bid, Some(60001.0));
        assert_eq!(q.ask, Some(60003.0));
        assert_eq!(q.last, 60002.0);
        assert_eq!(q.exchange_ts_ms, 1700000000123);
    }

    #[test]
    fn test_unknown_symbol_uses_default_scale() {
        let mut codec = PhemexCodec::new();
        let raw = r#"{"book":{"asks":[[30010000,1]],"bids":[[29990000,1]]},"symbol":"SOLUSD","timestamp":0}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].bid, Some(2999.0));
        assert_eq!(quotes[0].ask, Some(3001.0));
    }

    #[test]
    fn test_zero_scaled_price_invalidates_frame() {
        let mut codec = PhemexCodec::new();
        let raw = r#"{"book":{"asks":[[600030000,1]],"bids":[[0,1]]},"symbol":"BTCUSD","timestamp":0}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }

    #[test]
    fn test_delete_levels_skipped() {
        let mut codec = PhemexCodec::new();
        // First bid level has qty 0 (a delete); the next real level wins.
        let raw = r#"{"book":{"asks":[[600030000,5]],"bids":[[600020000,0],[600010000,7]]},"symbol":"BTCUSD","timestamp":0}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].bid, Some(60001.0));
    }

    #[test]
    fn test_decode_ack_and_pong() {
        let mut codec = PhemexCodec::new();
        assert_eq!(
            codec.decode(r#"{"error":null,"id":1,"result":{"status":"success"}}"#),
            DecodeOutcome::Ack(AckRef::RequestId(1))
        );
        assert_eq!(
            codec.decode(r#"{"error":null,"id":2,"result":"pong"}"#),
            DecodeOutcome::Heartbeat
        );
    }

    #[test]
    fn test_incomplete_book_ignored() {
        let mut codec = PhemexCodec::new();
        let raw = r#"{"book":{"asks":[],"bids":[[600010000,1]]},"symbol":"BTCUSD","timestamp":0}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }
}
