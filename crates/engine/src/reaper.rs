//! Periodic staleness eviction.

use crate::book::PriceBook;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Reaper schedule.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    /// Entries untouched for longer than this are evicted.
    pub max_age: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_age: Duration::from_secs(300),
        }
    }
}

/// Background task that reaps the book on a fixed interval.
pub struct StalenessReaper;

impl StalenessReaper {
    pub fn spawn(
        book: Arc<PriceBook>,
        config: ReaperConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(
                tokio::time::Instant::now() + config.interval,
                config.interval,
            );
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = book.reap(config.max_age);
                        if removed > 0 {
                            debug!("reaper evicted {removed} entries");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ArbitrageDetector, DetectorConfig};
    use crate::events::EventBus;
    use compact_str::CompactString;
    use rtd_core::{Exchange, Quote};

    fn book() -> Arc<PriceBook> {
        Arc::new(PriceBook::new(
            Arc::new(EventBus::default()),
            ArbitrageDetector::new(DetectorConfig::default()),
        ))
    }

    #[tokio::test]
    async fn test_reaper_evicts_on_schedule() {
        let book = book();
        book.update(Quote {
            exchange: Exchange::Binance,
            display_symbol: CompactString::from("BTCUSDT"),
            native_ticker: CompactString::from("BTCUSDT"),
            last: 60000.0,
            bid: None,
            ask: None,
            exchange_ts_ms: 0,
            recv_ts_ms: 1,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = StalenessReaper::spawn(
            book.clone(),
            ReaperConfig {
                interval: Duration::from_millis(20),
                max_age: Duration::ZERO,
            },
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(book.is_empty());

        let _ = shutdown_tx.send(true);
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_reaper_stops_on_shutdown() {
        let book = book();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = StalenessReaper::spawn(book, ReaperConfig::default(), shutdown_rx);

        let _ = shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper must stop promptly")
            .unwrap();
    }
}
