//! The embedder-facing facade.
//!
//! `PriceService` wires the event bus, the book, the reaper and one
//! supervisor per configured venue, pumps enriched quotes into the book, and
//! answers queries. It is equally usable behind an API server or from a
//! headless driver.

use crate::book::{BestPrices, MarketSummary, PriceBook, Spread};
use crate::detector::{AlertStatus, ArbitrageDetector, DetectorConfig};
use crate::error::ServiceError;
use crate::events::{Event, EventBus, Topic};
use crate::reaper::{ReaperConfig, StalenessReaper};
use compact_str::CompactString;
use rtd_core::{ArbitrageOpportunity, Exchange, Quote};
use rtd_feeds::{
    codec_for, ConnectionSupervisor, FeedEvent, FeedPlan, SupervisorConfig, SupervisorHandle,
    SupervisorState, SymbolRouter,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Everything needed to start the core.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub plan: FeedPlan,
    pub detector: DetectorConfig,
    pub reaper: ReaperConfig,
    pub supervisor: SupervisorConfig,
    pub event_capacity: usize,
    /// Budget for supervisors to wind down on stop/reload.
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn new(plan: FeedPlan) -> Self {
        Self {
            plan,
            detector: DetectorConfig::default(),
            reaper: ReaperConfig::default(),
            supervisor: SupervisorConfig::default(),
            event_capacity: crate::events::DEFAULT_EVENT_CAPACITY,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// One generation of feeds: the supervisors of the current plan plus the
/// pump that fans their events into the book.
struct FeedSet {
    router: Arc<SymbolRouter>,
    supervisors: Vec<SupervisorHandle>,
    pump: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl FeedSet {
    fn spawn(
        plan: &FeedPlan,
        supervisor_config: &SupervisorConfig,
        book: Arc<PriceBook>,
        events: Arc<EventBus>,
    ) -> Result<Self, ServiceError> {
        let router = Arc::new(SymbolRouter::new(plan.mode, &plan.routes)?);
        let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(FEED_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut supervisors = Vec::new();
        for exchange in router.exchanges() {
            let tickers = router.tickers_for(exchange).to_vec();
            info!("starting {exchange} supervisor with {} symbol(s)", tickers.len());
            supervisors.push(ConnectionSupervisor::spawn(
                codec_for(exchange),
                router.clone(),
                tickers,
                supervisor_config.clone(),
                feed_tx.clone(),
                shutdown_rx.clone(),
            ));
        }
        // The pump ends when the last supervisor drops its sender.
        drop(feed_tx);

        let pump = tokio::spawn(async move {
            while let Some(event) = feed_rx.recv().await {
                match event {
                    FeedEvent::Quote(quote) => book.update(quote),
                    FeedEvent::Exhausted(exchange) => {
                        warn!("{exchange}: supervisor exhausted");
                        events.publish(Event::SupervisorExhausted { exchange });
                    }
                }
            }
        });

        Ok(Self {
            router,
            supervisors,
            pump,
            shutdown_tx,
        })
    }

    async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.supervisors {
            handle.join(grace).await;
        }
        let mut pump = self.pump;
        if tokio::time::timeout(grace, &mut pump).await.is_err() {
            warn!("feed pump did not drain within grace period, aborting");
            pump.abort();
        }
    }
}

/// The running core.
pub struct PriceService {
    book: Arc<PriceBook>,
    events: Arc<EventBus>,
    feeds: Option<FeedSet>,
    reaper: JoinHandle<()>,
    reaper_shutdown: watch::Sender<bool>,
    supervisor_config: SupervisorConfig,
    shutdown_grace: Duration,
}

impl PriceService {
    /// Wire and start everything. Returns once all supervisors are spawned;
    /// connections are established in the background.
    pub fn start(config: ServiceConfig) -> Result<Self, ServiceError> {
        let events = Arc::new(EventBus::new(config.event_capacity));
        let book = Arc::new(PriceBook::new(
            events.clone(),
            ArbitrageDetector::new(config.detector.clone()),
        ));

        let feeds = FeedSet::spawn(
            &config.plan,
            &config.supervisor,
            book.clone(),
            events.clone(),
        )?;

        let (reaper_shutdown, reaper_rx) = watch::channel(false);
        let reaper = StalenessReaper::spawn(book.clone(), config.reaper.clone(), reaper_rx);

        info!(
            "price service started: {} venue(s), {} route(s)",
            feeds.supervisors.len(),
            config.plan.routes.len()
        );

        Ok(Self {
            book,
            events,
            feeds: Some(feeds),
            reaper,
            reaper_shutdown,
            supervisor_config: config.supervisor,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn book(&self) -> Arc<PriceBook> {
        self.book.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Routing mode of the active plan.
    pub fn route_mode(&self) -> Option<rtd_feeds::RouteMode> {
        self.feeds.as_ref().map(|feeds| feeds.router.mode())
    }

    /// Per-venue supervisor states, for health reporting.
    pub fn supervisor_states(&self) -> Vec<(Exchange, SupervisorState)> {
        self.feeds
            .as_ref()
            .map(|feeds| {
                feeds
                    .supervisors
                    .iter()
                    .map(|handle| (handle.exchange(), handle.state()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- queries -----------------------------------------------------------

    pub fn prices_all(&self) -> HashMap<CompactString, HashMap<Exchange, Quote>> {
        self.book.get_all()
    }

    pub fn prices_by_symbol(&self, symbol: &str) -> Option<HashMap<Exchange, Quote>> {
        self.book.get_by_symbol(symbol)
    }

    pub fn best_prices(&self, symbol: &str) -> Option<BestPrices> {
        self.book.best_prices(symbol)
    }

    /// Pairwise spread; venue ids are the stable lowercase identifiers.
    pub fn spread(
        &self,
        symbol: &str,
        exchange_a: &str,
        exchange_b: &str,
    ) -> Result<Option<Spread>, ServiceError> {
        let a: Exchange = exchange_a
            .parse()
            .map_err(|_| ServiceError::UnknownExchange(exchange_a.to_string()))?;
        let b: Exchange = exchange_b
            .parse()
            .map_err(|_| ServiceError::UnknownExchange(exchange_b.to_string()))?;
        Ok(self.book.spread(symbol, a, b))
    }

    pub fn summary(&self) -> MarketSummary {
        self.book.summary()
    }

    pub fn arbitrage(&self, symbol: &str, min_spread_pct: f64) -> Vec<ArbitrageOpportunity> {
        self.book.check_arbitrage(symbol, min_spread_pct)
    }

    pub fn arbitrage_status(&self, symbol: &str) -> AlertStatus {
        self.book.alert_status(symbol)
    }

    /// Subscribe a handler to a topic; delivery happens on its own task.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> JoinHandle<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.events.subscribe_fn(topic, handler)
    }

    // --- admin -------------------------------------------------------------

    /// Tear down the current supervisors and reinitialize under a new plan.
    /// Book state is discarded; the event bus and its subscribers survive.
    pub async fn reload(&mut self, plan: FeedPlan) -> Result<(), ServiceError> {
        info!("reloading configuration with {} route(s)", plan.routes.len());
        if let Some(feeds) = self.feeds.take() {
            feeds.shutdown(self.shutdown_grace).await;
        }
        self.book.clear();

        let feeds = FeedSet::spawn(
            &plan,
            &self.supervisor_config,
            self.book.clone(),
            self.events.clone(),
        )?;
        self.feeds = Some(feeds);
        Ok(())
    }

    /// Graceful shutdown: supervisors close their transports, background
    /// tasks are joined, and book state is dropped.
    pub async fn stop(mut self) {
        info!("stopping price service");
        if let Some(feeds) = self.feeds.take() {
            feeds.shutdown(self.shutdown_grace).await;
        }
        let _ = self.reaper_shutdown.send(true);
        let mut reaper = self.reaper;
        if tokio::time::timeout(self.shutdown_grace, &mut reaper).await.is_err() {
            warn!("reaper did not stop within grace period, aborting");
            reaper.abort();
        }
        self.book.clear();
        info!("price service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtd_feeds::RouteMode;

    fn empty_plan() -> FeedPlan {
        FeedPlan {
            mode: RouteMode::Legacy,
            routes: Vec::new(),
        }
    }

    fn quote(symbol: &str, exchange: Exchange, last: f64) -> Quote {
        Quote {
            exchange,
            display_symbol: symbol.into(),
            native_ticker: symbol.into(),
            last,
            bid: Some(last - 1.0),
            ask: Some(last + 1.0),
            exchange_ts_ms: 0,
            recv_ts_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_start_query_stop_without_venues() {
        let service = PriceService::start(ServiceConfig::new(empty_plan())).unwrap();
        assert!(service.supervisor_states().is_empty());
        assert_eq!(service.route_mode(), Some(RouteMode::Legacy));
        assert_eq!(service.summary().entry_count, 0);
        assert!(service.prices_by_symbol("BTCUSDT").is_none());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_queries_reflect_book_state() {
        let service = PriceService::start(ServiceConfig::new(empty_plan())).unwrap();
        let book = service.book();
        book.update(quote("ETHUSDT", Exchange::Binance, 3000.0));
        book.update(quote("ETHUSDT", Exchange::Bybit, 3010.0));

        assert_eq!(service.prices_all().len(), 1);
        assert_eq!(service.prices_by_symbol("ethusdt").unwrap().len(), 2);

        let spread = service.spread("ETHUSDT", "binance", "bybit").unwrap().unwrap();
        assert_eq!(spread.spread, 10.0);

        let opps = service.arbitrage("ETHUSDT", 0.1);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_exchange, Exchange::Binance);

        // The update already fired the alert, so the status is cooling down.
        assert!(!service.arbitrage_status("ETHUSDT").can_send_alert);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_spread_rejects_unknown_exchange() {
        let service = PriceService::start(ServiceConfig::new(empty_plan())).unwrap();
        let err = service.spread("BTCUSDT", "binance", "ftx").unwrap_err();
        assert!(matches!(err, ServiceError::UnknownExchange(name) if name == "ftx"));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_reload_discards_book_state() {
        let mut service = PriceService::start(ServiceConfig::new(empty_plan())).unwrap();
        service.book().update(quote("BTCUSDT", Exchange::Binance, 60000.0));
        assert_eq!(service.summary().entry_count, 1);

        service.reload(empty_plan()).await.unwrap();
        assert_eq!(service.summary().entry_count, 0);

        // The bus survives a reload: subscribers stay attached.
        let mut rx = service.events().subscribe(Topic::QuoteUpdated);
        service.book().update(quote("BTCUSDT", Exchange::Binance, 60000.0));
        assert!(rx.try_recv().is_ok());

        service.stop().await;
    }

    #[tokio::test]
    async fn test_events_flow_through_service_subscribe() {
        let service = PriceService::start(ServiceConfig::new(empty_plan())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = service.subscribe(Topic::QuoteUpdated, move |event| {
            let _ = tx.send(event);
        });

        service.book().update(quote("BTCUSDT", Exchange::Binance, 60000.0));
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::QuoteUpdated { .. }));

        service.stop().await;
    }
}
