//! Headless futures price fetcher.
//!
//! Loads an exchange/symbol plan, starts the core service, and logs price
//! updates, arbitrage opportunities and a periodic market summary until
//! interrupted.

use clap::Parser;
use rtd_engine::{DetectorConfig, Event, PriceService, ServiceConfig, Topic};
use rtd_feeds::{load_plan, SupervisorState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Real-time crypto futures price fetcher.
#[derive(Parser, Debug)]
#[command(name = "futures-rtd")]
#[command(about = "Streams futures prices from many exchanges and detects arbitrage", long_about = None)]
struct Args {
    /// Input file path (CSV or JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// Summary display interval in seconds
    #[arg(short, long, default_value_t = 30)]
    summary_interval: u64,

    /// Minimum arbitrage spread percentage before alerting
    #[arg(short = 'p', long, default_value_t = 0.1)]
    min_spread_pct: f64,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    // Clamp noisy transitive crates to warn regardless of our own level.
    let filter = EnvFilter::try_new(format!(
        "{level},\
         hyper=warn,\
         hyper_util=warn,\
         reqwest=warn,\
         rustls=warn,\
         tokio_tungstenite=warn,\
         tungstenite=warn,\
         h2=warn",
        level = level
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

fn log_handlers(service: &PriceService) {
    service.subscribe(Topic::QuoteUpdated, |event| {
        if let Event::QuoteUpdated { symbol, exchange, quote } = event {
            info!(
                "[{}] {symbol}: ${:.4}",
                exchange.as_str().to_uppercase(),
                quote.last
            );
        }
    });

    service.subscribe(Topic::ArbitrageFound, |event| {
        if let Event::ArbitrageFound { opportunities } = event {
            if let Some(best) = opportunities.first() {
                info!(
                    "ARBITRAGE: {} - buy on {} (${:.4}) -> sell on {} (${:.4}) | profit: {:.2}%",
                    best.symbol,
                    best.buy_exchange,
                    best.buy_price,
                    best.sell_exchange,
                    best.sell_price,
                    best.potential_profit
                );
            }
        }
    });

    service.subscribe(Topic::SupervisorExhausted, |event| {
        if let Event::SupervisorExhausted { exchange } = event {
            warn!("{exchange}: feed terminated after repeated failures");
        }
    });
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let plan = match load_plan(&args.input) {
        Ok(plan) => plan,
        Err(e) => {
            error!("failed to load input file: {e}");
            std::process::exit(1);
        }
    };
    if plan.is_empty() {
        error!("no supported exchanges found in input file");
        std::process::exit(1);
    }
    info!(
        "loaded {} symbol pair(s) ({:?} mode)",
        plan.routes.len(),
        plan.mode
    );

    let mut config = ServiceConfig::new(plan);
    config.detector = DetectorConfig {
        min_spread_pct: args.min_spread_pct,
        ..DetectorConfig::default()
    };

    let service = match PriceService::start(config) {
        Ok(service) => service,
        Err(e) => {
            error!("failed to start: {e}");
            std::process::exit(1);
        }
    };
    log_handlers(&service);

    let summary_book = service.book();
    let summary_interval = Duration::from_secs(args.summary_interval.max(1));
    let summary_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + summary_interval,
            summary_interval,
        );
        loop {
            tick.tick().await;
            let summary = summary_book.summary();
            info!(
                "summary: {} symbols, {} prices from {} exchanges",
                summary.symbol_count, summary.entry_count, summary.exchange_count
            );
        }
    });

    info!("monitoring prices, press Ctrl+C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down...");
    summary_task.abort();

    let states = service.supervisor_states();
    let dead: Vec<_> = states
        .iter()
        .filter(|(_, state)| *state == SupervisorState::Terminated)
        .map(|(exchange, _)| *exchange)
        .collect();
    if !dead.is_empty() {
        warn!("venues terminated before shutdown: {dead:?}");
    }

    service.stop().await;
    info!("shutdown complete");
}
