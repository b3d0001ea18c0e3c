//! Exit Planner Daemon
//!
//! Keeps the portfolio priced and logs projections on a fixed cadence:
//! prices every `EXIT_PLANNER_PRICE_REFRESH_SECS`, a portfolio summary every
//! `EXIT_PLANNER_TICKER_REFRESH_SECS`.
//!
//! Environment:
//! - `PLANNER_PRICE_SOURCE`: `coingecko` (default) or `static`
//! - `PLANNER_SEED_PATH`: portfolio snapshot JSON loaded at startup
//! - `PLANNER_EXPORT_PATH`: snapshot written on shutdown

mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planner_core::{
    MemoryPositionRepository, PlannerConfig, PortfolioSnapshot, PortfolioStore, PriceCache,
    PriceRefresher, PriceSource, Projector, ReferencePrices, StaticPriceSource,
};
use planner_feeds::CoinGeckoPriceSource;

use crate::state::AppState;

fn price_source() -> anyhow::Result<Arc<dyn PriceSource>> {
    let kind = std::env::var("PLANNER_PRICE_SOURCE").unwrap_or_else(|_| "coingecko".into());
    match kind.trim().to_lowercase().as_str() {
        "static" => Ok(Arc::new(StaticPriceSource::with_defaults())),
        "coingecko" => Ok(Arc::new(CoinGeckoPriceSource::from_env()?)),
        other => anyhow::bail!("unknown PLANNER_PRICE_SOURCE: {other}"),
    }
}

async fn load_seed(state: &AppState) -> anyhow::Result<()> {
    let Ok(path) = std::env::var("PLANNER_SEED_PATH") else {
        return Ok(());
    };
    let json = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading seed {path}"))?;
    let snapshot = PortfolioSnapshot::from_json(&json)?;
    state.seed(snapshot).await
}

async fn export_snapshot(state: &AppState) -> anyhow::Result<()> {
    let Ok(path) = std::env::var("PLANNER_EXPORT_PATH") else {
        return Ok(());
    };
    let json = state.snapshot().await.to_json()?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("writing snapshot {path}"))?;
    tracing::info!(path, "Exported portfolio snapshot");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PlannerConfig::from_env();
    config.validate()?;

    let source = price_source()?;
    tracing::info!(source = source.name(), "Price source ready");

    let cache = Arc::new(RwLock::new(PriceCache::with_config(
        ReferencePrices::default(),
        &config,
    )));
    let refresher = PriceRefresher::new(source, cache);
    let store = PortfolioStore::new(
        Arc::new(MemoryPositionRepository::new()),
        Projector::from_config(&config),
    );

    let state = AppState::new(store, refresher, config.clone());
    load_seed(&state).await?;

    tracing::info!(
        price_refresh_secs = config.price_refresh.as_secs(),
        ticker_secs = config.ticker_refresh.as_secs(),
        tax_rate = %config.tax_rate,
        tithe_rate = %config.tithe_rate,
        "Exit planner running"
    );

    let mut prices = interval(config.price_refresh);
    prices.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticker = interval(config.ticker_refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = prices.tick() => {
                let refresh_state = state.clone();
                tokio::spawn(async move {
                    refresh_state.refresh_prices().await;
                });
            }
            _ = ticker.tick() => {
                state.tick().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    export_snapshot(&state).await
}
