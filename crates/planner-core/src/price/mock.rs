//! Static Price Source
//!
//! For testing and offline runs. Serves scripted quotes and can be told to
//! fail for specific assets.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{PriceSource, RawQuote};
use crate::error::{PlannerError, Result};

#[derive(Default)]
struct Script {
    quotes: HashMap<String, RawQuote>,
    failing: HashSet<String>,
    calls: usize,
}

/// Price source with scripted quotes
#[derive(Default)]
pub struct StaticPriceSource {
    script: Mutex<Script>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-loaded with typical quotes for the common assets
    pub fn with_defaults() -> Self {
        Self::new()
            .with_quote("bitcoin", 97500.0, 2.5)
            .with_quote("ethereum", 3450.0, 1.8)
            .with_quote("solana", 195.0, 4.2)
            .with_quote("cardano", 0.95, -1.2)
            .with_quote("polkadot", 7.20, 0.8)
            .with_quote("chainlink", 24.50, 3.1)
            .with_quote("avalanche-2", 42.0, 5.5)
            .with_quote("ripple", 2.35, 0.9)
            .with_quote("dogecoin", 0.38, 12.0)
    }

    #[must_use]
    pub fn with_quote(self, asset_id: &str, usd: f64, change_24h: f64) -> Self {
        self.set_quote(asset_id, usd, change_24h);
        self
    }

    #[must_use]
    pub fn with_failure(self, asset_id: &str) -> Self {
        self.set_failing(asset_id, true);
        self
    }

    pub fn set_quote(&self, asset_id: &str, usd: f64, change_24h: f64) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.failing.remove(asset_id);
        script.quotes.insert(asset_id.to_string(), RawQuote::new(usd, change_24h));
    }

    pub fn set_failing(&self, asset_id: &str, failing: bool) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        if failing {
            script.failing.insert(asset_id.to_string());
        } else {
            script.failing.remove(asset_id);
        }
    }

    /// Number of `fetch_price` calls served so far
    pub fn calls(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).calls
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_price(&self, asset_id: &str) -> Result<RawQuote> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.calls += 1;

        if script.failing.contains(asset_id) {
            return Err(PlannerError::Source(format!("simulated outage for {asset_id}")));
        }

        script
            .quotes
            .get(asset_id)
            .copied()
            .ok_or_else(|| PlannerError::PriceUnavailable(asset_id.to_string()))
    }

    fn name(&self) -> &str {
        "StaticPrices"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticPriceSource::with_defaults();

        let btc = source.fetch_price("bitcoin").await.unwrap();
        assert!(btc.usd > 0.0);
        assert!(source.fetch_price("not-a-coin").await.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_toggle() {
        let source = StaticPriceSource::new()
            .with_quote("bitcoin", 95000.0, 0.0)
            .with_failure("bitcoin");
        assert!(matches!(
            source.fetch_price("bitcoin").await,
            Err(PlannerError::Source(_))
        ));

        source.set_failing("bitcoin", false);
        assert!(source.fetch_price("bitcoin").await.is_ok());
    }
}
