//! Price refresh cycle
//!
//! Fetches all tracked assets in parallel, merges each result into the cache
//! one asset at a time, then resolves every asset through the fallback chain.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{PriceBook, PriceCache, PriceSource, TrackedAsset};

/// Outcome of one refresh cycle
#[derive(Clone, Debug, Default)]
pub struct RefreshReport {
    /// Assets whose cache entry was overwritten by a valid quote
    pub updated: Vec<String>,

    /// Assets whose quote failed validation (cached value kept)
    pub rejected: Vec<String>,

    /// Assets whose fetch failed outright
    pub failed: Vec<String>,

    /// Assets with no live, cached or reference price
    pub unavailable: Vec<String>,

    /// Resolved prices after the merge
    pub prices: PriceBook,
}

impl RefreshReport {
    /// At least one asset received a valid quote this cycle
    pub fn is_live(&self) -> bool {
        !self.updated.is_empty()
    }
}

pub struct PriceRefresher {
    source: Arc<dyn PriceSource>,
    cache: Arc<RwLock<PriceCache>>,
}

impl PriceRefresher {
    pub fn new(source: Arc<dyn PriceSource>, cache: Arc<RwLock<PriceCache>>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> Arc<RwLock<PriceCache>> {
        Arc::clone(&self.cache)
    }

    /// Run one fetch-merge-resolve cycle. Never fails: source errors degrade
    /// to the next fallback tier and are logged.
    pub async fn refresh(&self, assets: &[TrackedAsset]) -> RefreshReport {
        let mut report = RefreshReport::default();
        if assets.is_empty() {
            return report;
        }

        let ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();
        let results = self.source.fetch_prices(&ids).await;

        for (asset_id, result) in results {
            match result {
                Ok(quote) => {
                    let accepted = {
                        let mut cache = self.cache.write().await;
                        cache.set(&asset_id, quote.usd, quote.change_24h)
                    };
                    if accepted {
                        report.updated.push(asset_id);
                    } else {
                        report.rejected.push(asset_id);
                    }
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        source = self.source.name(),
                        asset = %asset_id,
                        error = %e,
                        "Price fetch failed, falling back"
                    );
                    report.failed.push(asset_id);
                }
                Err(e) => {
                    tracing::error!(
                        source = self.source.name(),
                        asset = %asset_id,
                        error = %e,
                        "Price source returned an unexpected error, falling back"
                    );
                    report.failed.push(asset_id);
                }
            }
        }

        report.prices = self.resolve(assets).await;
        report.unavailable = assets
            .iter()
            .filter(|a| report.prices.quote(&a.id).is_none())
            .map(|a| a.id.clone())
            .collect();

        tracing::info!(
            updated = report.updated.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            unavailable = report.unavailable.len(),
            "Price refresh complete"
        );

        report
    }

    /// Resolve prices from the cache without fetching
    pub async fn resolve(&self, assets: &[TrackedAsset]) -> PriceBook {
        let cache = self.cache.read().await;
        let now = Utc::now();

        let mut book = PriceBook::new();
        for asset in assets {
            match cache.resolve(&asset.id, &asset.symbol, now) {
                Some(quote) => book.insert(asset.id.clone(), quote),
                None => tracing::warn!(asset = %asset.id, symbol = %asset.symbol, "No price available"),
            }
        }
        book
    }
}
