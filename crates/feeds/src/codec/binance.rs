//! Binance USDⓈ-M futures dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde::Deserialize;
use serde_json::Value;

/// Book-ticker stream codec. Binance publishes top-of-book only, so `last`
/// is derived as the mid price.
pub struct BinanceCodec {
    request_id: u64,
}

#[derive(Debug, Deserialize)]
struct BookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: Value,
    #[serde(rename = "a")]
    ask: Value,
    #[serde(rename = "T", default)]
    transaction_time: Value,
}

impl BinanceCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn stream_name(native_ticker: &str) -> String {
        format!("{}@bookTicker", native_ticker.to_lowercase())
    }

    fn decode_book_ticker(data: &Value) -> DecodeOutcome {
        let Ok(ticker) = serde_json::from_value::<BookTicker>(data.clone()) else {
            return DecodeOutcome::Ignore;
        };
        let (Some(bid), Some(ask)) = (positive(&ticker.bid), positive(&ticker.ask)) else {
            return DecodeOutcome::Ignore;
        };
        DecodeOutcome::quote(RawQuote {
            native_ticker: ticker.symbol,
            last: (bid + ask) / 2.0,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ms(&ticker.transaction_time),
        })
    }
}

impl Default for BinanceCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for BinanceCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://fstream.binance.com/ws".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"method":"SUBSCRIBE","params":["{}"],"id":{}}}"#,
            Self::stream_name(native_ticker),
            id
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"method":"UNSUBSCRIBE","params":["{}"],"id":{}}}"#,
            Self::stream_name(native_ticker),
            id
        ))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        // Subscription confirmation: {"result": null, "id": n}
        if msg.get("result").is_some_and(Value::is_null) {
            if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                return DecodeOutcome::Ack(AckRef::RequestId(id));
            }
        }

        if let Some(error) = msg.get("error") {
            let message = error
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown Binance error")
                .to_string();
            return DecodeOutcome::Error {
                message,
                is_fatal: false,
            };
        }

        if msg.get("e").and_then(Value::as_str) == Some("bookTicker") {
            return Self::decode_book_ticker(&msg);
        }
        // Combined-stream wrapper.
        if let (Some(_), Some(data)) = (msg.get("stream"), msg.get("data")) {
            return Self::decode_book_ticker(data);
        }

        DecodeOutcome::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = BinanceCodec::new();
        let frame = codec.subscribe_frame("BTCUSDT").unwrap();
        assert!(frame.contains("SUBSCRIBE"));
        assert!(frame.contains("btcusdt@bookTicker"));
        assert!(frame.contains("\"id\":1"));

        // Request ids increase monotonically.
        let frame = codec.unsubscribe_frame("BTCUSDT").unwrap();
        assert!(frame.contains("\"id\":2"));
    }

    #[test]
    fn test_decode_book_ticker() {
        let mut codec = BinanceCodec::new();
        let raw = r#"{"e":"bookTicker","u":400900217,"s":"BTCUSDT","b":"59999.00","B":"31.2","a":"60001.00","A":"40.6","T":1700000000123,"E":1700000000125}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes.len(), 1);
        let q = &quotes[0];
        assert_eq!(q.native_ticker, "BTCUSDT");
        assert_eq!(q.bid, Some(59999.0));
        assert_eq!(q.ask, Some(60001.0));
        assert_eq!(q.last, 60000.0);
        assert_eq!(q.exchange_ts_ms, 1700000000123);
    }

    #[test]
    fn test_decode_stream_wrapper() {
        let mut codec = BinanceCodec::new();
        let raw = r#"{"stream":"ethusdt@bookTicker","data":{"s":"ETHUSDT","b":"3000","a":"3001","T":1}}"#;
        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        assert_eq!(quotes[0].native_ticker, "ETHUSDT");
        assert_eq!(quotes[0].last, 3000.5);
    }

    #[test]
    fn test_decode_ack() {
        let mut codec = BinanceCodec::new();
        let outcome = codec.decode(r#"{"result":null,"id":7}"#);
        assert_eq!(outcome, DecodeOutcome::Ack(AckRef::RequestId(7)));
    }

    #[test]
    fn test_decode_error() {
        let mut codec = BinanceCodec::new();
        let outcome = codec.decode(r#"{"error":{"code":2,"msg":"Invalid request"}}"#);
        assert_eq!(
            outcome,
            DecodeOutcome::Error {
                message: "Invalid request".to_string(),
                is_fatal: false
            }
        );
    }

    #[test]
    fn test_invalid_prices_ignored() {
        let mut codec = BinanceCodec::new();
        // Missing ask
        assert_eq!(
            codec.decode(r#"{"e":"bookTicker","s":"BTCUSDT","b":"59999"}"#),
            DecodeOutcome::Ignore
        );
        // Non-positive bid
        assert_eq!(
            codec.decode(r#"{"e":"bookTicker","s":"BTCUSDT","b":"0","a":"60001","T":1}"#),
            DecodeOutcome::Ignore
        );
        // Non-numeric
        assert_eq!(
            codec.decode(r#"{"e":"bookTicker","s":"BTCUSDT","b":"x","a":"60001","T":1}"#),
            DecodeOutcome::Ignore
        );
        // Not JSON at all
        assert_eq!(codec.decode("not json"), DecodeOutcome::Ignore);
    }
}
