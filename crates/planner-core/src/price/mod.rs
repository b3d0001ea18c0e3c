//! Price Sources and Cache
//!
//! Quotes flow from a [`PriceSource`] through the validating [`PriceCache`]
//! and come out as a [`PriceBook`] that the projector reads from.
//!
//! Fallback chain per asset: live quote, cached quote (any age),
//! static reference price, then unavailable.

mod cache;
mod mock;
mod reference;
mod refresher;

pub use cache::{PriceCache, PriceCacheEntry, PriceCacheSnapshot};
pub use mock::StaticPriceSource;
pub use reference::ReferencePrices;
pub use refresher::{PriceRefresher, RefreshReport};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Unvalidated quote as delivered by a source
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawQuote {
    pub usd: f64,
    pub change_24h: f64,
}

impl RawQuote {
    pub const fn new(usd: f64, change_24h: f64) -> Self {
        Self { usd, change_24h }
    }
}

/// Price source trait (Strategy pattern)
///
/// Implement this for each quote provider: CoinGecko, an exchange, a fixture.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the current quote for one asset id
    async fn fetch_price(&self, asset_id: &str) -> Result<RawQuote>;

    /// Fetch several assets; one failure never hides the others
    async fn fetch_prices(&self, asset_ids: &[String]) -> Vec<(String, Result<RawQuote>)> {
        let fetches = asset_ids.iter().map(|id| async move {
            let quote = self.fetch_price(id).await;
            (id.clone(), quote)
        });
        futures::future::join_all(fetches).await
    }

    /// Source name for logs
    fn name(&self) -> &str;
}

/// Asset the refresher should keep priced
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedAsset {
    pub id: String,
    pub symbol: String,
}

impl TrackedAsset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into().to_uppercase(),
        }
    }
}

/// Which fallback tier produced a quote
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Live,
    Cached,
    Reference,
}

/// A resolved, validated price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,

    pub change_24h: Decimal,

    pub tier: PriceTier,

    /// When the underlying quote was fetched (`None` for reference prices)
    pub fetched_at: Option<DateTime<Utc>>,

    /// Older than the staleness window
    pub stale: bool,
}

/// Resolved prices keyed by asset id; a missing key means "unavailable"
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBook {
    quotes: HashMap<String, PriceQuote>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset_id: impl Into<String>, quote: PriceQuote) {
        self.quotes.insert(asset_id.into(), quote);
    }

    pub fn quote(&self, asset_id: &str) -> Option<&PriceQuote> {
        self.quotes.get(asset_id)
    }

    pub fn price(&self, asset_id: &str) -> Option<Decimal> {
        self.quotes.get(asset_id).map(|q| q.price)
    }

    /// True if at least one quote came from this cycle's fetch
    pub fn is_live(&self) -> bool {
        self.quotes.values().any(|q| q.tier == PriceTier::Live)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Book with fixed live prices, for callers that already hold validated values
    pub fn from_prices<I, K>(prices: I) -> Self
    where
        I: IntoIterator<Item = (K, Decimal)>,
        K: Into<String>,
    {
        let now = Utc::now();
        let quotes = prices
            .into_iter()
            .map(|(id, price)| {
                (
                    id.into(),
                    PriceQuote {
                        price,
                        change_24h: Decimal::ZERO,
                        tier: PriceTier::Live,
                        fetched_at: Some(now),
                        stale: false,
                    },
                )
            })
            .collect();
        Self { quotes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_book_missing_is_unavailable() {
        let book = PriceBook::from_prices([("bitcoin", dec!(95000))]);
        assert_eq!(book.price("bitcoin"), Some(dec!(95000)));
        assert_eq!(book.price("ethereum"), None);
        assert!(book.is_live());
    }

    #[tokio::test]
    async fn test_default_fetch_prices_keeps_failures_separate() {
        let source = StaticPriceSource::new()
            .with_quote("bitcoin", 95000.0, 2.5)
            .with_failure("ethereum");

        let ids = vec!["bitcoin".to_string(), "ethereum".to_string()];
        let results = source.fetch_prices(&ids).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
