//! Gate.io USDT futures ticker dialect.

use super::{positive, ts_ms_auto, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use rtd_core::Exchange;
use serde_json::Value;

/// `futures.tickers` channel. Gate.io tickers carry no top-of-book, so quotes
/// are emitted with `last` only and empty bid/ask.
pub struct GateioCodec {
    request_id: u64,
}

impl GateioCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn ticker_quote(entry: &Value) -> Option<RawQuote> {
        let native_ticker = entry["contract"].as_str()?;
        let last = positive(&entry["last"])?;
        let ts = [&entry["change_utc"], &entry["timestamp"], &entry["time"]]
            .into_iter()
            .map(ts_ms_auto)
            .find(|&t| t > 0)
            .unwrap_or(0);
        Some(RawQuote {
            native_ticker: native_ticker.to_string(),
            last,
            bid: None,
            ask: None,
            exchange_ts_ms: ts,
        })
    }

    fn decode_update(msg: &Value) -> DecodeOutcome {
        let result = &msg["result"];
        let quotes: Vec<RawQuote> = match result {
            Value::Array(entries) => entries.iter().filter_map(Self::ticker_quote).collect(),
            Value::Object(_) => Self::ticker_quote(result).into_iter().collect(),
            _ => Vec::new(),
        };
        if quotes.is_empty() {
            DecodeOutcome::Ignore
        } else {
            DecodeOutcome::Quotes(quotes)
        }
    }
}

impl Default for GateioCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for GateioCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Gateio
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stream {
            url: "wss://fx-ws.gateio.ws/v4/ws/usdt".to_string(),
        }
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"time":{id},"channel":"futures.tickers","event":"subscribe","payload":["{native_ticker}"]}}"#
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"time":{id},"channel":"futures.tickers","event":"unsubscribe","payload":["{native_ticker}"]}}"#
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"time":{id},"channel":"futures.ping","event":"ping"}}"#
        ))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        match msg.get("event").and_then(Value::as_str) {
            Some("subscribe") => {
                let status = msg["result"]["status"].as_str();
                if status == Some("success") {
                    let ticker = msg["payload"]
                        .as_array()
                        .and_then(|p| p.first())
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    return DecodeOutcome::Ack(AckRef::Ticker(ticker.to_string()));
                }
                return DecodeOutcome::Error {
                    message: format!("Gate.io subscription rejected: {:?}", msg["result"]),
                    is_fatal: false,
                };
            }
            Some("pong") => return DecodeOutcome::Heartbeat,
            Some("update") if msg["channel"].as_str() == Some("futures.tickers") => {
                return Self::decode_update(&msg);
            }
            _ => {}
        }

        DecodeOutcome::Ignore
    }
}
