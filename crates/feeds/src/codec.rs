//! Venue codec trait and shared decoding helpers.
//!
//! Each venue speaks its own JSON dialect over a stream (or, for CoinDCX, a
//! polled REST endpoint). A codec translates subscription requests, heartbeats
//! and inbound frames between that dialect and the canonical quote schema. The
//! supervisor serializes all calls on one codec instance; codecs keep no state
//! beyond a request-id counter and small per-ticker caches.

mod binance;
mod bitget;
mod bitmex;
mod bybit;
mod coindcx;
mod deribit;
mod gateio;
mod kucoin;
mod mexc;
mod okx;
mod phemex;

pub use binance::BinanceCodec;
pub use bitget::BitgetCodec;
pub use bitmex::BitmexCodec;
pub use bybit::BybitCodec;
pub use coindcx::CoindcxCodec;
pub use deribit::DeribitCodec;
pub use gateio::GateioCodec;
pub use kucoin::KucoinCodec;
pub use mexc::MexcCodec;
pub use okx::OkxCodec;
pub use phemex::PhemexCodec;

use crate::FeedError;
use async_trait::async_trait;
use rtd_core::Exchange;
use serde_json::Value;
use std::time::Duration;

/// How a venue is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent duplex stream carrying JSON frames.
    Stream { url: String },
    /// Periodic HTTP GET of a tickers endpoint.
    Poll { url: String, cadence: Duration },
}

/// A decoded quote before enrichment: still keyed by the venue's own ticker,
/// without `exchange` or local receive time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuote {
    pub native_ticker: String,
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub exchange_ts_ms: u64,
}

/// What the venue identified an acknowledgement by.
#[derive(Debug, Clone, PartialEq)]
pub enum AckRef {
    RequestId(u64),
    Ticker(String),
}

/// Result of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// One or more quotes. Several dialects batch multiple tickers per frame.
    Quotes(Vec<RawQuote>),
    /// The venue confirmed a subscription.
    Ack(AckRef),
    /// Pong or equivalent keepalive reply.
    Heartbeat,
    /// Venue-reported error. `fatal` terminates the supervisor.
    Error { message: String, is_fatal: bool },
    /// Unrecognized or unneeded frame, including invalid quote payloads.
    Ignore,
}

impl DecodeOutcome {
    pub fn quote(raw: RawQuote) -> Self {
        DecodeOutcome::Quotes(vec![raw])
    }
}

/// Translator between one venue's wire dialect and canonical quotes.
#[async_trait]
pub trait QuoteCodec: Send {
    fn exchange(&self) -> Exchange;

    fn transport(&self) -> TransportKind;

    /// Pre-connect hook. May return an endpoint override (KuCoin fetches its
    /// connection token here). A fatal error here terminates the supervisor.
    async fn prepare(&mut self) -> Result<Option<String>, FeedError> {
        Ok(None)
    }

    /// Wire frame requesting a subscription, or `None` when the transport
    /// needs no frame (poll codecs record the ticker in their filter instead).
    fn subscribe_frame(&mut self, native_ticker: &str) -> Option<String>;

    fn unsubscribe_frame(&mut self, native_ticker: &str) -> Option<String>;

    /// Application-level keepalive frame. `None` means the transport's
    /// built-in ping is used.
    fn heartbeat_frame(&mut self) -> Option<String> {
        None
    }

    /// Whether this venue confirms subscriptions. When false the supervisor
    /// goes live right after the subscribe frames are sent.
    fn acks_subscriptions(&self) -> bool {
        true
    }

    fn decode(&mut self, raw: &str) -> DecodeOutcome;
}

/// Build the codec for a venue.
pub fn codec_for(exchange: Exchange) -> Box<dyn QuoteCodec> {
    match exchange {
        Exchange::Binance => Box::new(BinanceCodec::new()),
        Exchange::Bybit => Box::new(BybitCodec::new()),
        Exchange::Okx => Box::new(OkxCodec::new()),
        Exchange::Kucoin => Box::new(KucoinCodec::new()),
        Exchange::Deribit => Box::new(DeribitCodec::new()),
        Exchange::Bitget => Box::new(BitgetCodec::new()),
        Exchange::Gateio => Box::new(GateioCodec::new()),
        Exchange::Mexc => Box::new(MexcCodec::new()),
        Exchange::Bitmex => Box::new(BitmexCodec::new()),
        Exchange::Phemex => Box::new(PhemexCodec::new()),
        Exchange::Coindcx => Box::new(CoindcxCodec::new()),
    }
}

/// Numeric field that venues send as either a JSON number or a string.
pub(crate) fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Like [`num`] but rejects non-positive values.
pub(crate) fn positive(value: &Value) -> Option<f64> {
    num(value).filter(|v| *v > 0.0)
}

/// Millisecond timestamp from a field that may be a number or numeric string.
/// Unknown shapes normalize to 0.
pub(crate) fn ts_ms(value: &Value) -> u64 {
    match num(value) {
        Some(v) if v > 0.0 => v as u64,
        _ => 0,
    }
}

/// Seconds-vs-milliseconds heuristic used by venues with ambiguous stamps:
/// anything below 1e12 is treated as seconds.
pub(crate) fn ts_ms_auto(value: &Value) -> u64 {
    let raw = ts_ms(value);
    if raw == 0 {
        0
    } else if raw < 1_000_000_000_000 {
        raw * 1000
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_num_accepts_both_shapes() {
        assert_eq!(num(&json!(42.5)), Some(42.5));
        assert_eq!(num(&json!("42.5")), Some(42.5));
        assert_eq!(num(&json!(" 7 ")), Some(7.0));
        assert_eq!(num(&json!(null)), None);
        assert_eq!(num(&json!("abc")), None);
    }

    #[test]
    fn test_positive_rejects_zero_and_negative() {
        assert_eq!(positive(&json!(0)), None);
        assert_eq!(positive(&json!("-1.5")), None);
        assert_eq!(positive(&json!(0.01)), Some(0.01));
    }

    #[test]
    fn test_ts_ms_auto_seconds_heuristic() {
        assert_eq!(ts_ms_auto(&json!(1_700_000_000)), 1_700_000_000_000);
        assert_eq!(ts_ms_auto(&json!(1_700_000_000_123u64)), 1_700_000_000_123);
        assert_eq!(ts_ms_auto(&json!("oops")), 0);
    }

    #[test]
    fn test_codec_factory_covers_every_exchange() {
        for &exchange in Exchange::all() {
            let codec = codec_for(exchange);
            assert_eq!(codec.exchange(), exchange);
            match codec.transport() {
                TransportKind::Stream { url } => assert!(url.starts_with("wss://")),
                TransportKind::Poll { url, cadence } => {
                    assert!(url.starts_with("https://"));
                    assert!(cadence >= Duration::from_secs(3));
                    assert!(cadence <= Duration::from_secs(5));
                }
            }
        }
    }

    #[test]
    fn test_polled_factory_matches_exchange_flag() {
        for &exchange in Exchange::all() {
            let codec = codec_for(exchange);
            let polled = matches!(codec.transport(), TransportKind::Poll { .. });
            assert_eq!(polled, exchange.is_polled());
        }
    }
}
