//! Application State

use std::sync::Arc;

use chrono::Utc;
use planner_core::{
    PlannerConfig, PortfolioProjection, PortfolioSnapshot, PortfolioStore, PriceBook,
    PriceRefresher, RefreshReport,
};
use tokio::sync::RwLock;

/// Shared daemon state
#[derive(Clone)]
pub struct AppState {
    /// Positions; writes are serialized by the lock
    pub store: Arc<RwLock<PortfolioStore>>,

    /// Fetch-merge-resolve cycle over the shared price cache
    pub refresher: Arc<PriceRefresher>,

    /// Prices resolved by the most recent refresh
    pub prices: Arc<RwLock<PriceBook>>,

    pub config: PlannerConfig,
}

impl AppState {
    pub fn new(store: PortfolioStore, refresher: PriceRefresher, config: PlannerConfig) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            refresher: Arc::new(refresher),
            prices: Arc::new(RwLock::new(PriceBook::new())),
            config,
        }
    }

    /// Load positions and cached prices from a snapshot
    pub async fn seed(&self, snapshot: PortfolioSnapshot) -> anyhow::Result<()> {
        let positions = snapshot.positions.len();
        {
            let mut store = self.store.write().await;
            for position in snapshot.positions {
                store.upsert(position)?;
            }
        }

        let cache = self.refresher.cache();
        let restored = cache.write().await.restore(snapshot.prices, Utc::now());
        tracing::info!(positions, restored, "Seeded portfolio");
        Ok(())
    }

    pub async fn snapshot(&self) -> PortfolioSnapshot {
        let positions = self.store.read().await.positions().to_vec();
        let prices = self.refresher.cache().read().await.snapshot();
        PortfolioSnapshot { positions, prices }
    }

    /// One price cycle; the store lock is not held while fetching
    pub async fn refresh_prices(&self) -> RefreshReport {
        let assets = self.store.read().await.tracked_assets();
        let report = self.refresher.refresh(&assets).await;
        *self.prices.write().await = report.prices.clone();
        report
    }

    pub async fn projection(&self) -> PortfolioProjection {
        let prices = self.prices.read().await;
        self.store.read().await.project(&prices)
    }

    /// Log a portfolio summary and the most pressing exit signals
    pub async fn tick(&self) -> PortfolioProjection {
        let projection = self.projection().await;

        tracing::info!(
            positions = projection.positions.len(),
            value = %projection.current_value.round_dp(2),
            unrealized = %projection.unrealized_pnl.round_dp(2),
            planned_exit = %projection.planned_exit_value.round_dp(2),
            realized = %projection.realized_value.round_dp(2),
            net = %projection.net.round_dp(2),
            progress_pct = %projection.exit_progress_pct.round_dp(1),
            live = projection.live,
            "Portfolio"
        );
        if !projection.unpriced.is_empty() {
            tracing::warn!(assets = ?projection.unpriced, "No price available");
        }
        for signal in projection.top_signals(3) {
            tracing::info!(
                asset = %signal.symbol,
                target = %signal.target_price,
                current = %signal.current_price,
                status = ?signal.status,
                "Exit signal"
            );
        }

        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planner_core::{
        ExitLevel, MemoryPositionRepository, NewHolding, Position, PriceCache, Projector,
        ReferencePrices, StaticPriceSource,
    };
    use rust_decimal_macros::dec;

    fn state(source: StaticPriceSource) -> AppState {
        let config = PlannerConfig::default();
        let cache = Arc::new(RwLock::new(PriceCache::with_config(ReferencePrices::default(), &config)));
        let refresher = PriceRefresher::new(Arc::new(source), cache);
        let store = PortfolioStore::new(
            Arc::new(MemoryPositionRepository::new()),
            Projector::from_config(&config),
        );
        AppState::new(store, refresher, config)
    }

    #[tokio::test]
    async fn test_refresh_then_tick() {
        let state = state(StaticPriceSource::new().with_quote("bitcoin", 100_000.0, 1.0));
        {
            let mut store = state.store.write().await;
            store
                .add_holding(NewHolding {
                    id: "bitcoin".into(),
                    symbol: "BTC".into(),
                    name: "Bitcoin".into(),
                    quantity: dec!(1),
                    avg_cost: dec!(40000),
                })
                .unwrap();
            store
                .add_level("bitcoin", ExitLevel::new(dec!(90000), dec!(25)).unwrap())
                .unwrap();
        }

        let report = state.refresh_prices().await;
        assert!(report.is_live());

        let projection = state.tick().await;
        assert_eq!(projection.current_value, dec!(100000));
        assert!(projection.signals[0].is_urgent());
    }

    #[tokio::test]
    async fn test_seed_and_snapshot() {
        let state = state(StaticPriceSource::new());
        let snapshot = PortfolioSnapshot {
            positions: vec![Position::new("ethereum", "ETH", "Ethereum", dec!(2), dec!(1500)).unwrap()],
            ..PortfolioSnapshot::default()
        };

        state.seed(snapshot).await.unwrap();
        let exported = state.snapshot().await;
        assert_eq!(exported.positions.len(), 1);
        assert_eq!(exported.positions[0].quantity, dec!(2));

        // never fetched: reference tier
        let report = state.refresh_prices().await;
        assert_eq!(report.failed, vec!["ethereum".to_string()]);
        assert_eq!(state.projection().await.unpriced.len(), 0);
    }
}
