//! Mapping between operator-facing display symbols and venue tickers.

use compact_str::CompactString;
use rtd_core::Exchange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How display symbols relate to wire tickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Explicit `(exchange, native_ticker) -> display_symbol` table.
    Mapped,
    /// The same string plays both roles; no rewriting.
    Legacy,
}

/// One configured subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRoute {
    pub display_symbol: String,
    pub exchange: Exchange,
    pub native_ticker: String,
}

impl SymbolRoute {
    /// Legacy route: one string for both roles.
    pub fn legacy(exchange: Exchange, symbol: &str) -> Self {
        let symbol = symbol.to_uppercase();
        Self {
            display_symbol: symbol.clone(),
            exchange,
            native_ticker: symbol,
        }
    }
}

/// Invalid routing tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("duplicate ticker {ticker} on {exchange}")]
    DuplicateTicker { exchange: Exchange, ticker: String },

    #[error("display symbol {symbol} appears twice on {exchange}")]
    DuplicateDisplaySymbol { exchange: Exchange, symbol: String },
}

/// Immutable routing table, swapped wholesale on reload.
#[derive(Debug)]
pub struct SymbolRouter {
    mode: RouteMode,
    by_native: HashMap<(Exchange, String), CompactString>,
    /// Tickers per exchange in configuration order, for subscription replay.
    tickers: HashMap<Exchange, Vec<String>>,
}

impl SymbolRouter {
    pub fn new(mode: RouteMode, routes: &[SymbolRoute]) -> Result<Self, RouterError> {
        let mut by_native = HashMap::new();
        let mut by_display: HashMap<(Exchange, String), ()> = HashMap::new();
        let mut tickers: HashMap<Exchange, Vec<String>> = HashMap::new();

        for route in routes {
            let ticker = route.native_ticker.to_uppercase();
            let display = route.display_symbol.to_uppercase();

            if by_native
                .insert((route.exchange, ticker.clone()), CompactString::new(&display))
                .is_some()
            {
                return Err(RouterError::DuplicateTicker {
                    exchange: route.exchange,
                    ticker,
                });
            }
            if by_display
                .insert((route.exchange, display.clone()), ())
                .is_some()
            {
                return Err(RouterError::DuplicateDisplaySymbol {
                    exchange: route.exchange,
                    symbol: display,
                });
            }
            tickers
                .entry(route.exchange)
                .or_default()
                .push(route.native_ticker.clone());
        }

        Ok(Self {
            mode,
            by_native,
            tickers,
        })
    }

    pub fn mode(&self) -> RouteMode {
        self.mode
    }

    /// Display symbol for an inbound venue ticker. `None` means the quote must
    /// be dropped (mapped mode only; legacy mode never fails).
    pub fn lookup(&self, exchange: Exchange, native_ticker: &str) -> Option<CompactString> {
        match self.mode {
            RouteMode::Legacy => Some(CompactString::from(native_ticker.to_uppercase())),
            RouteMode::Mapped => self
                .by_native
                .get(&(exchange, native_ticker.to_uppercase()))
                .cloned(),
        }
    }

    /// Tickers to subscribe for a venue, in configuration order.
    pub fn tickers_for(&self, exchange: Exchange) -> &[String] {
        self.tickers
            .get(&exchange)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Venues with at least one configured ticker.
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = self.tickers.keys().copied().collect();
        exchanges.sort();
        exchanges
    }
}
