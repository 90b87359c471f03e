//! Cross-venue arbitrage detection with rate-limited alerting.

use compact_str::CompactString;
use dashmap::DashMap;
use rtd_core::{ArbitrageOpportunity, Exchange, Quote};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum spread percentage for a pair to count as an opportunity.
    pub min_spread_pct: f64,
    /// Minimum interval between alerts for one symbol.
    pub cooldown: Duration,
    /// Alert stamps older than this are garbage collected.
    pub alert_gc_horizon: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_spread_pct: 0.1,
            cooldown: Duration::from_secs(300),
            alert_gc_horizon: Duration::from_secs(3600),
        }
    }
}

/// Cooldown state as reported to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertStatus {
    pub symbol: CompactString,
    pub can_send_alert: bool,
    pub seconds_since_last_alert: Option<f64>,
    pub seconds_until_next_alert: f64,
    pub cooldown_seconds: f64,
    /// Wall-clock time of the last alert in milliseconds.
    pub last_alert_at: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct AlertStamp {
    at: Instant,
    wall_ms: u64,
}

/// Scans the venue snapshot of a symbol for profitable pairs and throttles
/// alert emission per symbol. The scan itself runs on every update; only the
/// emission is suppressed during cooldown.
#[derive(Debug)]
pub struct ArbitrageDetector {
    config: DetectorConfig,
    last_alert: DashMap<CompactString, AlertStamp>,
}

impl ArbitrageDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            last_alert: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// All opportunities at or above `min_spread_pct` for one symbol,
    /// best first. Pairs are compared on `last`.
    pub fn scan(
        &self,
        symbol: &str,
        quotes: &HashMap<Exchange, Quote>,
        min_spread_pct: f64,
    ) -> Vec<ArbitrageOpportunity> {
        if quotes.len() < 2 {
            return Vec::new();
        }

        let mut entries: Vec<(&Exchange, &Quote)> = quotes.iter().collect();
        // Stable pair enumeration regardless of map iteration order.
        entries.sort_by_key(|(exchange, _)| **exchange);

        let mut opportunities = Vec::new();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (ex_a, quote_a) = entries[i];
                let (ex_b, quote_b) = entries[j];
                let (buy, sell) = if quote_a.last <= quote_b.last {
                    ((ex_a, quote_a), (ex_b, quote_b))
                } else {
                    ((ex_b, quote_b), (ex_a, quote_a))
                };

                let opp = ArbitrageOpportunity::new(
                    CompactString::from(symbol),
                    *buy.0,
                    *sell.0,
                    buy.1.last,
                    sell.1.last,
                );
                if opp.spread_pct >= min_spread_pct {
                    opportunities.push(opp);
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.spread_pct
                .partial_cmp(&a.spread_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        opportunities
    }

    /// Whether an alert for this symbol is currently allowed.
    pub fn can_alert(&self, symbol: &str) -> bool {
        match self.last_alert.get(symbol) {
            None => true,
            Some(stamp) => stamp.at.elapsed() >= self.config.cooldown,
        }
    }

    /// Record that an alert was just emitted for this symbol.
    pub fn mark_alerted(&self, symbol: &str) {
        self.last_alert.insert(
            CompactString::from(symbol),
            AlertStamp {
                at: Instant::now(),
                wall_ms: now_ms(),
            },
        );
    }

    pub fn alert_status(&self, symbol: &str) -> AlertStatus {
        let cooldown_seconds = self.config.cooldown.as_secs_f64();
        match self.last_alert.get(symbol) {
            None => AlertStatus {
                symbol: CompactString::from(symbol),
                can_send_alert: true,
                seconds_since_last_alert: None,
                seconds_until_next_alert: 0.0,
                cooldown_seconds,
                last_alert_at: None,
            },
            Some(stamp) => {
                let since = stamp.at.elapsed().as_secs_f64();
                AlertStatus {
                    symbol: CompactString::from(symbol),
                    can_send_alert: since >= cooldown_seconds,
                    seconds_since_last_alert: Some(since),
                    seconds_until_next_alert: (cooldown_seconds - since).max(0.0),
                    cooldown_seconds,
                    last_alert_at: Some(stamp.wall_ms),
                }
            }
        }
    }

    /// Drop stamps for symbols that no longer exist in the book.
    pub fn retain_symbols<F>(&self, mut alive: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.last_alert.retain(|symbol, _| alive(symbol.as_str()));
    }

    /// Drop stamps older than the GC horizon. Returns how many were dropped.
    pub fn gc(&self) -> usize {
        let horizon = self.config.alert_gc_horizon;
        let before = self.last_alert.len();
        self.last_alert.retain(|_, stamp| stamp.at.elapsed() <= horizon);
        before - self.last_alert.len()
    }

    pub fn clear(&self) {
        self.last_alert.clear();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
