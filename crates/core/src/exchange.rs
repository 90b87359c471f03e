//! Exchange identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported futures venues.
///
/// The string form (`as_str` / `FromStr` / serde) is the stable lowercase
/// identifier used in configuration files and query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
    Kucoin,
    Deribit,
    Bitget,
    Gateio,
    Mexc,
    Bitmex,
    Phemex,
    Coindcx,
}

/// Error for unrecognized exchange identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported exchange: {0}")]
pub struct UnknownExchange(pub String);

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Bybit => "bybit",
            Exchange::Okx => "okx",
            Exchange::Kucoin => "kucoin",
            Exchange::Deribit => "deribit",
            Exchange::Bitget => "bitget",
            Exchange::Gateio => "gateio",
            Exchange::Mexc => "mexc",
            Exchange::Bitmex => "bitmex",
            Exchange::Phemex => "phemex",
            Exchange::Coindcx => "coindcx",
        }
    }

    /// All supported venues.
    pub fn all() -> &'static [Exchange] {
        &[
            Exchange::Binance,
            Exchange::Bybit,
            Exchange::Okx,
            Exchange::Kucoin,
            Exchange::Deribit,
            Exchange::Bitget,
            Exchange::Gateio,
            Exchange::Mexc,
            Exchange::Bitmex,
            Exchange::Phemex,
            Exchange::Coindcx,
        ]
    }

    /// True for venues consumed via periodic REST polling instead of a stream.
    pub fn is_polled(self) -> bool {
        matches!(self, Exchange::Coindcx)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "bybit" => Ok(Exchange::Bybit),
            "okx" => Ok(Exchange::Okx),
            "kucoin" => Ok(Exchange::Kucoin),
            "deribit" => Ok(Exchange::Deribit),
            "bitget" => Ok(Exchange::Bitget),
            "gateio" => Ok(Exchange::Gateio),
            "mexc" => Ok(Exchange::Mexc),
            "bitmex" => Ok(Exchange::Bitmex),
            "phemex" => Ok(Exchange::Phemex),
            "coindcx" => Ok(Exchange::Coindcx),
            other => Err(UnknownExchange(other.to_string())),
        }
    }
}
