//! OKX v5 public books dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;

/// Subscribes to the `books` channel per instrument; `last` is the mid of the
/// best levels. OKX carries no request ids on its public socket.
pub struct OkxCodec;

impl OkxCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode_books(msg: &Value) -> DecodeOutcome {
        let Some(native_ticker) = msg["arg"]["instId"].as_str() else {
            return DecodeOutcome::Ignore;
        };
        let Some(book) = msg["data"].as_array().and_then(|d| d.first()) else {
            return DecodeOutcome::Ignore;
        };

        let best = |side: &str| -> Option<f64> {
            book.get(side)
                .and_then(Value::as_array)
                .and_then(|levels| levels.first())
                .and_then(Value::as_array)
                .and_then(|level| level.first())
                .and_then(positive)
        };
        let (Some(bid), Some(ask)) = (best("bids"), best("asks")) else {
            return DecodeOutcome::Ignore;
        };

        DecodeOutcome::quote(RawQuote {
            native_ticker: native_ticker.to_string(),
            last: (bid + ask) / 2.0,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ms(&book["ts"]),
        })
    }
}

impl Default for OkxCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for OkxCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://ws.okx.com:8443/ws/v5/public".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"subscribe","args":[{{"channel":"books","instId":"{native_ticker}"}}]}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"unsubscribe","args":[{{"channel":"books","instId":"{native_ticker}"}}]}}"#
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

        match msg.get("event").and_then(Value::as_str) {
            Some("subscribe") => {
                let inst = msg["arg"]["instId"].as_str().unwrap_or("unknown");
                return DecodeOutcome::Ack(AckRef::Ticker(inst.to_string()));
            }
            Some("error") => {
                let message = msg
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown OKX error")
                    .to_string();
                return DecodeOutcome::Error {
                    message,
                    is_fatal: false,
                };
            }
            _ => {}
        }

        if msg["arg"]["channel"].as_str() == Some("books") && msg.get("data").is_some() {
            return Self::decode_books(&msg);
        }

        DecodeOutcome::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = OkxCodec::new();
        let frame = codec.subscribe_frame("BTC-USDT-SWAP").unwrap();
        assert!(frame.contains(r#""channel":"books""#));
        assert!(frame.contains("BTC-USDT-SWAP"));
    }

    #[test]
    fn test_decode_books() {
        let mut codec = OkxCodec::new();
        let raw = r#"{"arg":{"channel":"books","instId":"BTC-USDT-SWAP"},"action":"update","data":[{"bids":[["59990.1","12","0","4"]],"asks":[["60009.9","3","0","1"]],"ts":"1700000000300","seqId":9}]}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        let q = &quotes[0];
        assert_eq!(q.native_ticker, "BTC-USDT-SWAP");
        assert_eq!(q.bid, Some(59990.1));
        assert_eq!(q.ask, Some(60009.9));
        assert_eq!(q.exchange_ts_ms, 1700000000300);
    }

    #[test]
    fn test_decode_ack() {
        let mut codec = OkxCodec::new();
        let outcome =
            codec.decode(r#"{"event":"subscribe","arg":{"channel":"books","instId":"BTC-USDT-SWAP"}}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Ack(AckRef::Ticker("BTC-USDT-SWAP".to_string()))
        );
    }

    #[test]
    fn test_decode_error_event() {
        let mut codec = OkxCodec::new();
        let outcome = codec.decode(r#"{"event":"error","code":"60012","msg":"Invalid request"}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Error {
                message: "Invalid request".to_string(),
                is_fatal: false
            }
        );
    }

    #[test]
    fn test_plain_pong() {
        let mut codec = OkxCodec::new();
        assert_eq!(codec.decode("pong"), DecodeOutcome::Heartbeat);
    }

    #[test]
    fn test_empty_book_ignored() {
        let mut codec = OkxCodec::new();
        let raw = r#"{"arg":{"channel":"books","instId":"BTC-USDT-SWAP"},"data":[{"bids":[],"asks":[["60009.9","3"]],"ts":"1"}]}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }
}
