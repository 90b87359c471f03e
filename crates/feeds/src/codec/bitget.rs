//! Bitget v2 USDT futures ticker dialect.

use super::{positive, ts_ms, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;

/// Ticker channel with `instType: USDT-FUTURES`. Frames may batch several
/// instruments in one `data` array.
pub struct BitgetCodec;

impl BitgetCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode_tickers(msg: &Value) -> DecodeOutcome {
        let Some(entries) = msg["data"].as_array() else {
            return DecodeOutcome::Ignore;
        };

        let mut quotes = Vec::new();
        for entry in entries {
            let Some(native_ticker) = entry["instId"].as_str() else {
                continue;
            };
            let (Some(last), Some(bid), Some(ask)) = (
                positive(&entry["lastPr"]),
                positive(&entry["bidPr"]),
                positive(&entry["askPr"]),
            ) else {
                continue;
            };
            quotes.push(RawQuote {
                native_ticker: native_ticker.to_string(),
                last,
                bid: Some(bid),
                ask: Some(ask),
                exchange_ts_ms: ts_ms(&entry["ts"]),
            });
        }

        if quotes.is_empty() {
            DecodeOutcome::Ignore
        } else {
            DecodeOutcome::Quotes(quotes)
        }
    }
}

impl Default for BitgetCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for BitgetCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://ws.bitget.com/v2/ws/public".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"subscribe","args":[{{"instType":"USDT-FUTURES","channel":"ticker","instId":"{native_ticker}"}}]}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        Some(format!(
            r#"{{"op":"unsubscribe","args":[{{"instType":"USDT-FUTURES","channel":"ticker","instId":"{native_ticker}"}}]}}"#
        ))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        match msg.get("event").and_then(Value::as_str) {
            Some("subscribe") => {
                let inst = msg["arg"]["instId"].as_str().unwrap_or("unknown");
                return DecodeOutcome::Ack(AckRef::Ticker(inst.to_string()));
            }
            Some("pong") => return DecodeOutcome::Heartbeat,
            Some("error") => {
                return DecodeOutcome::Error {
                    message: msg["msg"]
                        .as_str()
                        .unwrap_or("unknown Bitget error")
                        .to_string(),
                    is_fatal: false,
                }
            }
            _ => {}
        }

        if msg.get("data").is_some() && msg["arg"]["channel"].as_str() == Some("ticker") {
            return Self::decode_tickers(&msg);
        }

        DecodeOutcome::Ignore
    }
}
