//! The concurrent price book.
//!
//! Latest quote per (display symbol, exchange), flat-keyed so per-key writes
//! and reaps never interleave. Each entry carries a monotonic write stamp
//! used exclusively for staleness decisions; venue wall-clock time stays
//! inside the quote.

use crate::detector::{AlertStatus, ArbitrageDetector};
use crate::events::{Event, EventBus};
use compact_str::CompactString;
use dashmap::DashMap;
use rtd_core::{ArbitrageOpportunity, Exchange, Quote};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

type BookKey = (CompactString, Exchange);

#[derive(Debug, Clone)]
struct BookEntry {
    quote: Quote,
    /// Monotonic write stamp. Never decreases for a key.
    touched: Instant,
}

/// One side of the cross-venue best price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideQuote {
    pub price: f64,
    pub exchange: Exchange,
    pub timestamp_ms: u64,
}

/// Best bid/ask across venues for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestPrices {
    pub symbol: CompactString,
    pub best_bid: Option<SideQuote>,
    pub best_ask: Option<SideQuote>,
    pub spread: Option<f64>,
    pub spread_pct: Option<f64>,
}

/// Pairwise spread between two venues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spread {
    pub symbol: CompactString,
    pub spread: f64,
    /// Relative to the cheaper leg, in percent.
    pub spread_pct: f64,
    pub higher: Exchange,
    pub lower: Exchange,
    pub higher_price: f64,
    pub lower_price: f64,
    /// Newest event time of the two legs.
    pub timestamp: u64,
}

/// Book-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub symbol_count: usize,
    pub exchange_count: usize,
    pub symbols: Vec<CompactString>,
    pub exchanges: Vec<Exchange>,
    pub entry_count: usize,
    pub wall_clock_ms: u64,
}

/// Thread-safe store of the latest canonical quotes.
pub struct PriceBook {
    entries: DashMap<BookKey, BookEntry>,
    detector: ArbitrageDetector,
    events: Arc<EventBus>,
}

impl PriceBook {
    pub fn new(events: Arc<EventBus>, detector: ArbitrageDetector) -> Self {
        Self {
            entries: DashMap::new(),
            detector,
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn detector(&self) -> &ArbitrageDetector {
        &self.detector
    }

    /// Store a quote, emit `quote-updated`, and evaluate arbitrage for the
    /// affected symbol. Invalid quotes are dropped, never stored.
    pub fn update(&self, mut quote: Quote) {
        if quote.last <= 0.0 {
            debug!(
                "dropping non-positive quote for {} from {}",
                quote.display_symbol, quote.exchange
            );
            return;
        }
        quote.bid = quote.bid.filter(|v| *v > 0.0);
        quote.ask = quote.ask.filter(|v| *v > 0.0);

        let symbol = CompactString::from(quote.display_symbol.to_uppercase());
        quote.display_symbol = symbol.clone();
        let exchange = quote.exchange;

        self.entries.insert(
            (symbol.clone(), exchange),
            BookEntry {
                quote: quote.clone(),
                touched: Instant::now(),
            },
        );

        self.events.publish(Event::QuoteUpdated {
            symbol: symbol.clone(),
            exchange,
            quote,
        });

        self.evaluate_arbitrage(&symbol);
    }

    /// Detector pass for one symbol. The scan always runs; the event is
    /// emitted only outside the cooldown window.
    fn evaluate_arbitrage(&self, symbol: &str) {
        let Some(quotes) = self.get_by_symbol(symbol) else {
            return;
        };
        if quotes.len() < 2 {
            return;
        }

        let min_pct = self.detector.config().min_spread_pct;
        let opportunities = self.detector.scan(symbol, &quotes, min_pct);
        if opportunities.is_empty() {
            return;
        }
        if self.detector.can_alert(symbol) {
            info!(
                "arbitrage: {} opportunity(ies) on {symbol}, best {:.4}%",
                opportunities.len(),
                opportunities[0].spread_pct
            );
            self.detector.mark_alerted(symbol);
            self.events.publish(Event::ArbitrageFound { opportunities });
        }
    }

    /// All venue quotes for a symbol, or `None` when the symbol is unknown.
    pub fn get_by_symbol(&self, symbol: &str) -> Option<HashMap<Exchange, Quote>> {
        let symbol = symbol.to_uppercase();
        let quotes: HashMap<Exchange, Quote> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == symbol)
            .map(|entry| (entry.key().1, entry.value().quote.clone()))
            .collect();
        if quotes.is_empty() {
            None
        } else {
            Some(quotes)
        }
    }

    /// Deep-copy snapshot of the whole book.
    pub fn get_all(&self) -> HashMap<CompactString, HashMap<Exchange, Quote>> {
        let mut all: HashMap<CompactString, HashMap<Exchange, Quote>> = HashMap::new();
        for entry in self.entries.iter() {
            let (symbol, exchange) = entry.key();
            all.entry(symbol.clone())
                .or_default()
                .insert(*exchange, entry.value().quote.clone());
        }
        all
    }

    pub fn symbols(&self) -> BTreeSet<CompactString> {
        self.entries.iter().map(|e| e.key().0.clone()).collect()
    }

    pub fn exchanges(&self) -> BTreeSet<Exchange> {
        self.entries.iter().map(|e| e.key().1).collect()
    }

    /// Best bid (highest) and best ask (lowest) across venues. Price ties go
    /// to the most recently received quote.
    pub fn best_prices(&self, symbol: &str) -> Option<BestPrices> {
        let quotes = self.get_by_symbol(symbol)?;

        let mut best_bid: Option<(f64, &Quote)> = None;
        let mut best_ask: Option<(f64, &Quote)> = None;
        for quote in quotes.values() {
            if let Some(bid) = quote.bid {
                let better = match best_bid {
                    None => true,
                    Some((current, holder)) => {
                        bid > current || (bid == current && quote.recv_ts_ms > holder.recv_ts_ms)
                    }
                };
                if better {
                    best_bid = Some((bid, quote));
                }
            }
            if let Some(ask) = quote.ask {
                let better = match best_ask {
                    None => true,
                    Some((current, holder)) => {
                        ask < current || (ask == current && quote.recv_ts_ms > holder.recv_ts_ms)
                    }
                };
                if better {
                    best_ask = Some((ask, quote));
                }
            }
        }

        let best_bid = best_bid.map(|(price, quote)| SideQuote {
            price,
            exchange: quote.exchange,
            timestamp_ms: quote.timestamp_ms(),
        });
        let best_ask = best_ask.map(|(price, quote)| SideQuote {
            price,
            exchange: quote.exchange,
            timestamp_ms: quote.timestamp_ms(),
        });

        let (spread, spread_pct) = match (&best_bid, &best_ask) {
            (Some(bid), Some(ask)) => {
                let spread = ask.price - bid.price;
                let pct = if bid.price > 0.0 {
                    spread / bid.price * 100.0
                } else {
                    0.0
                };
                (Some(spread), Some(pct))
            }
            _ => (None, None),
        };

        Some(BestPrices {
            symbol: CompactString::from(symbol.to_uppercase()),
            best_bid,
            best_ask,
            spread,
            spread_pct,
        })
    }

    /// Spread between two venues on their `last` prices.
    pub fn spread(&self, symbol: &str, a: Exchange, b: Exchange) -> Option<Spread> {
        let quotes = self.get_by_symbol(symbol)?;
        let quote_a = quotes.get(&a)?;
        let quote_b = quotes.get(&b)?;

        let spread = (quote_a.last - quote_b.last).abs();
        let min_price = quote_a.last.min(quote_b.last);
        let spread_pct = if min_price > 0.0 {
            spread / min_price * 100.0
        } else {
            0.0
        };
        let (higher, lower) = if quote_a.last >= quote_b.last {
            (a, b)
        } else {
            (b, a)
        };

        Some(Spread {
            symbol: CompactString::from(symbol.to_uppercase()),
            spread,
            spread_pct,
            higher,
            lower,
            higher_price: quote_a.last.max(quote_b.last),
            lower_price: min_price,
            timestamp: quote_a.timestamp_ms().max(quote_b.timestamp_ms()),
        })
    }

    /// Opportunities for one symbol at an ad-hoc threshold.
    pub fn check_arbitrage(&self, symbol: &str, min_spread_pct: f64) -> Vec<ArbitrageOpportunity> {
        match self.get_by_symbol(symbol) {
            Some(quotes) => self.detector.scan(&symbol.to_uppercase(), &quotes, min_spread_pct),
            None => Vec::new(),
        }
    }

    pub fn alert_status(&self, symbol: &str) -> AlertStatus {
        self.detector.alert_status(&symbol.to_uppercase())
    }

    /// True when the entry is missing or was last written before `max_age`.
    pub fn is_stale(&self, symbol: &str, exchange: Exchange, max_age: Duration) -> bool {
        let key = (CompactString::from(symbol.to_uppercase()), exchange);
        match self.entries.get(&key) {
            Some(entry) => entry.touched.elapsed() > max_age,
            None => true,
        }
    }

    /// Evict entries older than `max_age` and prune cooldown stamps whose
    /// symbols no longer exist. Returns the number of evicted quote entries.
    pub fn reap(&self, max_age: Duration) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.touched.elapsed() > max_age {
                removed += 1;
                false
            } else {
                true
            }
        });

        let alive: HashSet<CompactString> =
            self.entries.iter().map(|e| e.key().0.clone()).collect();
        self.detector.retain_symbols(|symbol| alive.contains(symbol));
        let dropped_stamps = self.detector.gc();

        if removed > 0 {
            info!("reaped {removed} stale price entries");
        }
        if dropped_stamps > 0 {
            debug!("dropped {dropped_stamps} old arbitrage alert stamps");
        }
        removed
    }

    pub fn summary(&self) -> MarketSummary {
        let symbols: Vec<CompactString> = self.symbols().into_iter().collect();
        let exchanges: Vec<Exchange> = self.exchanges().into_iter().collect();
        MarketSummary {
            symbol_count: symbols.len(),
            exchange_count: exchanges.len(),
            symbols,
            exchanges,
            entry_count: self.entries.len(),
            wall_clock_ms: now_ms(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all quotes and cooldown stamps (used by reload and shutdown).
    pub fn clear(&self) {
        self.entries.clear();
        self.detector.clear();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
