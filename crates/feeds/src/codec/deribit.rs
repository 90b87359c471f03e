//! Deribit JSON-RPC v2 dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;

/// Subscribes to `ticker.<instrument>.100ms` notifications.
pub struct DeribitCodec {
    request_id: u64,
}

impl DeribitCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn decode_ticker(msg: &Value) -> DecodeOutcome {
        let data = &msg["params"]["data"];
        let Some(native_ticker) = data["instrument_name"].as_str() else {
            return DecodeOutcome::Ignore;
        };

        let (Some(last), Some(bid), Some(ask)) = (
            positive(&data["last_price"]),
            positive(&data["best_bid_price"]),
            positive(&data["best_ask_price"]),
        ) else {
            return DecodeOutcome::Ignore;
        };

        DecodeOutcome::quote(RawQuote {
            native_ticker: native_ticker.to_string(),
            last,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ms(&data["timestamp"]),
        })
    }
}

impl Default for DeribitCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for DeribitCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Deribit
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://www.deribit.com/ws/api/v2".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"public/subscribe","params":{{"channels":["ticker.{native_ticker}.100ms"]}}}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"public/unsubscribe","params":{{"channels":["ticker.{native_ticker}.100ms"]}}}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"public/test"}}"#
        ))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        if let Some(error) = msg.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("unknown Deribit error")
                .to_string();
            return DecodeOutcome::Error {
                message,
                is_fatal: false,
            };
        }

        // RPC result: subscription confirmations and test replies both land
        // here; either way the request id was answered.
        if msg.get("result").is_some() {
            if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                return DecodeOutcome::Ack(AckRef::RequestId(id));
            }
        }

        if msg.get("method").and_then(Value::as_str) == Some("subscription") {
            return Self::decode_ticker(&msg);
        }

        DecodeOutcome::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = DeribitCodec::new();
        let frame = codec.subscribe_frame("BTC-PERPETUAL").unwrap();
        assert!(frame.contains("public/subscribe"));
        assert!(frame.contains("ticker.BTC-PERPETUAL.100ms"));
        assert!(frame.contains(r#""jsonrpc":"2.0""#));
    }

    #[test]
    fn test_decode_ticker_notification() {
        let mut codec = DeribitCodec::new();
        let raw = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"ticker.BTC-PERPETUAL.100ms","data":{"instrument_name":"BTC-PERPETUAL","last_price":60000.5,"best_bid_price":59999.5,"best_ask_price":60001.5,"timestamp":1700000000400}}}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        let q = &quotes[0];
        assert_eq!(q.native_ticker, "BTC-PERPETUAL");
        assert_eq!(q.last, 60000.5);
        assert_eq!(q.bid, Some(59999.5));
        assert_eq!(q.exchange_ts_ms, 1700000000400);
    }

    #[test]
    fn test_decode_ack() {
        let mut codec = DeribitCodec::new();
        let outcome = codec.decode(r#"{"jsonrpc":"2.0","id":2,"result":["ticker.BTC-PERPETUAL.100ms"]}"#);
        assert_eq!(outcome, DecodeOutcome::Ack(AckRef::RequestId(2)));
    }

    #[test]
    fn test_decode_error() {
        let mut codec = DeribitCodec::new();
        let outcome =
            codec.decode(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"Invalid params"}}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Error {
                message: "Invalid params".to_string(),
                is_fatal: false
            }
        );
    }

    #[test]
    fn test_missing_price_ignored() {
        let mut codec = DeribitCodec::new();
        let raw = r#"{"method":"subscription","params":{"data":{"instrument_name":"BTC-PERPETUAL","best_bid_price":59999.5,"best_ask_price":60001.5}}}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }
}
