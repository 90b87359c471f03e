//! MEXC contract dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde::Deserialize;
use serde_json::Value;

pub struct MexcCodec {
    request_id: u64,
}

#[derive(Debug, Deserialize)]
struct MexcTicker {
    symbol: String,
    #[serde(alias = "last", default)]
    #[serde(rename = "lastPrice")]
    last_price: Value,
    #[serde(alias = "bidPrice", default)]
    bid1: Value,
    #[serde(alias = "askPrice", default)]
    ask1: Value,
    #[serde(default)]
    timestamp: Value,
}

impl MexcCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn decode_ticker(msg: &Value) -> DecodeOutcome {
        let Ok(ticker) = serde_json::from_value::<MexcTicker>(msg["data"].clone()) else {
            return DecodeOutcome::Ignore;
        };
        let (Some(last), Some(bid), Some(ask)) = (
            positive(&ticker.last_price),
            positive(&ticker.bid1),
            positive(&ticker.ask1),
        ) else {
            return DecodeOutcome::Ignore;
        };
        DecodeOutcome::quote(RawQuote {
            native_ticker: ticker.symbol,
            last,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ms(&ticker.timestamp),
        })
    }
}

impl Default for MexcCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for MexcCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Mexc
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://contract.mexc.com/edge".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"method":"sub.ticker","param":{{"symbol":"{native_ticker}"}},"id":{id}}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"method":"unsub.ticker","param":{{"symbol":"{native_ticker}"}},"id":{id}}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(r#"{{"method":"ping","id":{id}}}"#))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        if msg.get("channel").and_then(Value::as_str) == Some("pong") {
            return DecodeOutcome::Heartbeat;
        }

        if let Some(code) = msg.get("code").and_then(Value::as_i64) {
            if code == 0 {
                if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                    return DecodeOutcome::Ack(AckRef::RequestId(id));
                }
            } else {
                return DecodeOutcome::Error {
                    message: msg["msg"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("MEXC error code {code}")),
                    is_fatal: false,
                };
            }
        }

        if msg.get("channel").and_then(Value::as_str) == Some("push.ticker")
            && msg.get("data").is_some()
        {
            return Self::decode_ticker(&msg);
        }

        DecodeOutcome::Ignore
    }
}
