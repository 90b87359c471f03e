//! Bybit v5 linear futures dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;

/// Top-of-book orderbook stream (`orderbook.1.<ticker>`); `last` is the mid.
pub struct BybitCodec {
    request_id: u64,
}

impl BybitCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn decode_orderbook(msg: &Value) -> DecodeOutcome {
        // Topic looks like "orderbook.1.BTCUSDT".
        let Some(topic) = msg.get("topic").and_then(Value::as_str) else {
            return DecodeOutcome::Ignore;
        };
        let Some(native_ticker) = topic.splitn(3, '.').nth(2) else {
            return DecodeOutcome::Ignore;
        };

        let data = &msg["data"];
        let best = |side: &str| -> Option<f64> {
            data.get(side)
                .and_then(Value::as_array)
                .and_then(|levels| levels.first())
                .and_then(Value::as_array)
                .and_then(|level| level.first())
                .and_then(positive)
        };
        let (Some(bid), Some(ask)) = (best("b"), best("a")) else {
            return DecodeOutcome::Ignore;
        };

        DecodeOutcome::quote(RawQuote {
            native_ticker: native_ticker.to_string(),
            last: (bid + ask) / 2.0,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ms(&msg["ts"]),
        })
    }
}

impl Default for BybitCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for BybitCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://stream.bybit.com/v5/public/linear".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"op":"subscribe","args":["orderbook.1.{native_ticker}"],"req_id":"{id}"}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"op":"unsubscribe","args":["orderbook.1.{native_ticker}"],"req_id":"{id}"}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(r#"{{"op":"ping","req_id":"{id}"}}"#))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        if msg.get("op").and_then(Value::as_str) == Some("pong") {
            return DecodeOutcome::Heartbeat;
        }

        if let Some(success) = msg.get("success").and_then(Value::as_bool) {
            let req_id = msg
                .get("req_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            if success {
                return DecodeOutcome::Ack(AckRef::RequestId(req_id));
            }
            let message = msg
                .get("ret_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown Bybit error")
                .to_string();
            return DecodeOutcome::Error {
                message,
                is_fatal: false,
            };
        }

        if msg.get("topic").is_some() && msg.get("data").is_some() {
            return Self::decode_orderbook(&msg);
        }

        DecodeOutcome::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = BybitCodec::new();
        let frame = codec.subscribe_frame("BTCUSDT").unwrap();
        assert!(frame.contains(r#""op":"subscribe""#));
        assert!(frame.contains("orderbook.1.BTCUSDT"));
    }

    #[test]
    fn test_decode_orderbook() {
        let mut codec = BybitCodec::new();
        let raw = r#"{"topic":"orderbook.1.BTCUSDT","type":"delta","ts":1700000000200,"data":{"s":"BTCUSDT","b":[["59998.50","1.2"]],"a":[["60001.50","0.8"]],"u":1,"seq":2}}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        let q = &quotes[0];
        assert_eq!(q.native_ticker, "BTCUSDT");
        assert_eq!(q.bid, Some(59998.5));
        assert_eq!(q.ask, Some(60001.5));
        assert_eq!(q.last, 60000.0);
        assert_eq!(q.exchange_ts_ms, 1700000000200);
    }

    #[test]
    fn test_empty_side_ignored() {
        let mut codec = BybitCodec::new();
        let raw = r#"{"topic":"orderbook.1.BTCUSDT","ts":1,"data":{"b":[],"a":[["60001","1"]]}}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }

    #[test]
    fn test_decode_ack_and_pong() {
        let mut codec = BybitCodec::new();
        assert_eq!(
            codec.decode(r#"{"success":true,"ret_msg":"","op":"subscribe","req_id":"3"}"#),
            DecodeOutcome::Ack(AckRef::RequestId(3))
        );
        assert_eq!(
            codec.decode(r#"{"success":true,"ret_msg":"pong","op":"pong"}"#),
            DecodeOutcome::Heartbeat
        );
    }

    #[test]
    fn test_decode_subscribe_failure() {
        let mut codec = BybitCodec::new();
        let outcome = codec.decode(r#"{"success":false,"ret_msg":"bad topic","op":"subscribe"}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Error {
                message: "bad topic".to_string(),
                is_fatal: false
            }
        );
    }
}
