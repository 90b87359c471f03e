//! Subscription plan loading.
//!
//! Two file shapes are accepted, CSV or JSON:
//! - legacy: `exchange,symbol` rows; the symbol is used verbatim on the wire
//!   and as the display symbol;
//! - mapped: `display_symbol,exchange,ticker` rows; inbound quotes are
//!   re-keyed from the venue ticker to the display symbol.
//!
//! Rows naming unsupported exchanges are dropped with a warning. Unreadable
//! files are startup errors.

use crate::router::{RouteMode, SymbolRoute};
use rtd_core::Exchange;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Parsed subscription plan handed to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPlan {
    pub mode: RouteMode,
    pub routes: Vec<SymbolRoute>,
}

impl FeedPlan {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("unsupported input format: {0} (expected .csv, .txt or .json)")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Mapped {
        display_symbol: String,
        exchange: String,
        ticker: String,
    },
    Legacy {
        exchange: String,
        symbol: String,
    },
}

/// Load a subscription plan from a CSV/TXT or JSON file.
pub fn load_plan(path: &Path) -> Result<FeedPlan, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "txt" => parse_csv(&text),
        "json" => parse_json(&text),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Parse the CSV shape. The header row selects the mode.
pub fn parse_csv(text: &str) -> Result<FeedPlan, ConfigError> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| ConfigError::Invalid("empty input file".to_string()))?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();

    let mode = match columns.as_slice() {
        [a, b] if a == "exchange" && b == "symbol" => RouteMode::Legacy,
        [a, b, c] if a == "display_symbol" && b == "exchange" && c == "ticker" => RouteMode::Mapped,
        _ => {
            return Err(ConfigError::Invalid(format!(
                "unrecognized CSV header: {header}"
            )))
        }
    };

    let mut routes = Vec::new();
    for (index, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let row = index + 1;
        match mode {
            RouteMode::Legacy => {
                let [exchange, symbol] = fields.as_slice() else {
                    warn!("skipping invalid row {row}: {line}");
                    continue;
                };
                if symbol.is_empty() {
                    warn!("skipping invalid row {row}: {line}");
                    continue;
                }
                if let Some(exchange) = known_exchange(exchange) {
                    routes.push(SymbolRoute::legacy(exchange, symbol));
                }
            }
            RouteMode::Mapped => {
                let [display, exchange, ticker] = fields.as_slice() else {
                    warn!("skipping invalid row {row}: {line}");
                    continue;
                };
                if display.is_empty() || ticker.is_empty() {
                    warn!("skipping invalid row {row}: {line}");
                    continue;
                }
                if let Some(exchange) = known_exchange(exchange) {
                    routes.push(SymbolRoute {
                        display_symbol: display.to_uppercase(),
                        exchange,
                        native_ticker: ticker.to_uppercase(),
                    });
                }
            }
        }
    }

    Ok(FeedPlan { mode, routes })
}

/// Parse the JSON shape: an array of pair objects, all of one mode.
pub fn parse_json(text: &str) -> Result<FeedPlan, ConfigError> {
    let entries: Vec<JsonEntry> = serde_json::from_str(text)
        .map_err(|e| ConfigError::Invalid(format!("invalid JSON: {e}")))?;

    let mut mode = None;
    let mut routes = Vec::new();
    for entry in &entries {
        let entry_mode = match entry {
            JsonEntry::Mapped { .. } => RouteMode::Mapped,
            JsonEntry::Legacy { .. } => RouteMode::Legacy,
        };
        match mode {
            None => mode = Some(entry_mode),
            Some(m) if m != entry_mode => {
                return Err(ConfigError::Invalid(
                    "mixed legacy and mapped entries in one file".to_string(),
                ))
            }
            _ => {}
        }

        match entry {
            JsonEntry::Legacy { exchange, symbol } => {
                if symbol.trim().is_empty() {
                    warn!("skipping entry with empty symbol");
                    continue;
                }
                if let Some(exchange) = known_exchange(exchange) {
                    routes.push(SymbolRoute::legacy(exchange, symbol.trim()));
                }
            }
            JsonEntry::Mapped {
                display_symbol,
                exchange,
                ticker,
            } => {
                if display_symbol.trim().is_empty() || ticker.trim().is_empty() {
                    warn!("skipping entry with empty symbol fields");
                    continue;
                }
                if let Some(exchange) = known_exchange(exchange) {
                    routes.push(SymbolRoute {
                        display_symbol: display_symbol.trim().to_uppercase(),
                        exchange,
                        native_ticker: ticker.trim().to_uppercase(),
                    });
                }
            }
        }
    }

    Ok(FeedPlan {
        mode: mode.unwrap_or(RouteMode::Legacy),
        routes,
    })
}

fn known_exchange(name: &str) -> Option<Exchange> {
    match name.parse::<Exchange>() {
        Ok(exchange) => Some(exchange),
        Err(_) => {
            warn!(
                "unsupported exchange will be ignored: {} (supported: {})",
                name.trim(),
                Exchange::all()
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            None
        }
    }
}
