//! KuCoin futures dialect.
//!
//! KuCoin gates its public stream behind a connection token fetched from the
//! `bullet-public` endpoint; the websocket URL is only known after that call.

use super::{positive, AckRef, DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use crate::FeedError;
use rtd_core::Exchange;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const BULLET_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KucoinCodec {
    request_id: u64,
}

#[derive(Debug, Deserialize)]
struct BulletResponse {
    code: String,
    #[serde(default)]
    data: Option<BulletData>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers")]
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    endpoint: String,
}

impl KucoinCodec {
    pub fn new() -> Self {
        Self { request_id: 1 }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_id;
        self.request_id += 1;
        id
    }

    fn topic(native_ticker: &str) -> String {
        format!("/contractMarket/ticker:{native_ticker}")
    }

    fn decode_ticker(msg: &Value) -> DecodeOutcome {
        let Some(topic) = msg.get("topic").and_then(Value::as_str) else {
            return DecodeOutcome::Ignore;
        };
        let Some(native_ticker) = topic.strip_prefix("/contractMarket/ticker:") else {
            return DecodeOutcome::Ignore;
        };

        let data = &msg["data"];
        let (Some(last), Some(bid), Some(ask)) = (
            positive(&data["price"]),
            positive(&data["bestBidPrice"]),
            positive(&data["bestAskPrice"]),
        ) else {
            return DecodeOutcome::Ignore;
        };

        // KuCoin stamps in nanoseconds.
        let ts_ns = data["ts"].as_u64().unwrap_or(0);
        DecodeOutcome::quote(RawQuote {
            native_ticker: native_ticker.to_string(),
            last,
            bid: Some(bid),
            ask: Some(ask),
            exchange_ts_ms: ts_ns / 1_000_000,
        })
    }
}

impl Default for KucoinCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuoteCodec for KucoinCodec {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    fn transport(&self) -> TransportKind {
        // Placeholder; the real endpoint comes from `prepare`.
        TransportKind::Stream {
            url: "wss://ws-api.kucoin.com/endpoint".to_string(),
        }
    }

    async fn prepare(&mut self) -> Result<Option<String>, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(TOKEN_TIMEOUT)
            .build()?;
        let response: BulletResponse = client.post(BULLET_URL).send().await?.json().await?;

        if response.code != "200000" {
            return Err(FeedError::AuthenticationFailed(format!(
                "KuCoin token request rejected: {}",
                response.msg.unwrap_or_else(|| response.code.clone())
            )));
        }
        let data = response.data.ok_or_else(|| {
            FeedError::AuthenticationFailed("KuCoin token response missing data".to_string())
        })?;
        let server = data.instance_servers.first().ok_or_else(|| {
            FeedError::AuthenticationFailed("KuCoin returned no instance servers".to_string())
        })?;

        info!("KuCoin websocket token obtained");
        Ok(Some(format!("{}?token={}", server.endpoint, data.token)))
    }

    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"id":{id},"type":"subscribe","topic":"{}","privateChannel":false,"response":true}}"#,
            Self::topic(native_ticker)
        ))
    }

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String> {
        let id = self.next_id();
        Some(format!(
            r#"{{"id":{id},"type":"unsubscribe","topic":"{}","privateChannel":false,"response":true}}"#,
            Self::topic(native_ticker)
        ))
    }

    fn heartbeat_frame(&mut self) -> Option<String> {
        let id = self.next_id();
        Some(format!(r#"{{"id":{id},"type":"ping"}}"#))
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return DecodeOutcome::Ignore;
        };

        match msg.get("type").and_then(Value::as_str) {
            Some("welcome") => DecodeOutcome::Ignore,
            Some("pong") => DecodeOutcome::Heartbeat,
            Some("ack") => {
                let id = match &msg["id"] {
                    Value::String(s) => s.parse::<u64>().unwrap_or(0),
                    other => other.as_u64().unwrap_or(0),
                };
                DecodeOutcome::Ack(AckRef::RequestId(id))
            }
            Some("error") => DecodeOutcome::Error {
                message: msg["data"]
                    .as_str()
                    .or_else(|| msg["msg"].as_str())
                    .unwrap_or("unknown KuCoin error")
                    .to_string(),
                is_fatal: false,
            },
            Some("message") if msg.get("data").is_some() => Self::decode_ticker(&msg),
            _ => DecodeOutcome::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_format() {
        let mut codec = KucoinCodec::new();
        let frame = codec.subscribe_frame("XBTUSDTM").unwrap();
        assert!(frame.contains("/contractMarket/ticker:XBTUSDTM"));
        assert!(frame.contains(r#""type":"subscribe""#));
        assert!(frame.contains(r#""response":true"#));
    }

    #[test]
    fn test_decode_ticker_converts_nanoseconds() {
        let mut codec = KucoinCodec::new();
        let raw = r#"{"type":"message","topic":"/contractMarket/ticker:XBTUSDTM","subject":"ticker","data":{"symbol":"XBTUSDTM","price":"60000.0","bestBidPrice":"59999.0","bestAskPrice":"60001.0","ts":1700000000123456789}}"#;

        let DecodeOutcome::Quotes(quotes) = codec.decode(raw) else {
            panic!("expected quotes");
        };
        let q = &quotes[0];
        assert_eq!(q.native_ticker, "XBTUSDTM");
        assert_eq!(q.last, 60000.0);
        assert_eq!(q.exchange_ts_ms, 1700000000123);
    }

    #[test]
    fn test_zero_price_ignored() {
        let mut codec = KucoinCodec::new();
        let raw = r#"{"type":"message","topic":"/contractMarket/ticker:XBTUSDTM","data":{"price":"0","bestBidPrice":"59999","bestAskPrice":"60001","ts":1}}"#;
        assert_eq!(codec.decode(raw), DecodeOutcome::Ignore);
    }

    #[test]
    fn test_decode_ack_welcome_pong() {
        let mut codec = KucoinCodec::new();
        assert_eq!(
            codec.decode(r#"{"id":"5","type":"ack"}"#),
            DecodeOutcome::Ack(AckRef::RequestId(5))
        );
        assert_eq!(
            codec.decode(r#"{"id":"x","type":"welcome"}"#),
            DecodeOutcome::Ignore
        );
        assert_eq!(
            codec.decode(r#"{"id":"6","type":"pong"}"#),
            DecodeOutcome::Heartbeat
        );
    }
}
