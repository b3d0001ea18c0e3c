//! Validating Price Cache
//!
//! Stores the last valid quote per asset. Invalid quotes are discarded
//! and never replace a previously valid entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{PriceQuote, PriceTier, ReferencePrices};
use crate::config::PlannerConfig;

/// Upper bound for a plausible price; anything at or above is treated as corrupt
pub const MAX_VALID_PRICE: f64 = 1_000_000.0;

/// A price of exactly 1 is the signature of corrupted upstream data
pub const CORRUPTED_PRICE_SENTINEL: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCacheEntry {
    pub price: Decimal,
    pub change_24h: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// Serializable copy of the cache contents
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCacheSnapshot {
    pub entries: HashMap<String, PriceCacheEntry>,
}

pub struct PriceCache {
    entries: HashMap<String, PriceCacheEntry>,
    reference: ReferencePrices,
    live_window: chrono::Duration,
    stale_after: chrono::Duration,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(ReferencePrices::default())
    }
}

impl PriceCache {
    pub fn new(reference: ReferencePrices) -> Self {
        Self::with_config(reference, &PlannerConfig::default())
    }

    pub fn with_config(reference: ReferencePrices, config: &PlannerConfig) -> Self {
        Self {
            entries: HashMap::new(),
            reference,
            live_window: config.live_window(),
            stale_after: config.stale_after(),
        }
    }

    /// Finite, positive, not the corruption sentinel, below the plausibility cap
    #[allow(clippy::float_cmp)]
    pub fn is_valid(price: f64) -> bool {
        price.is_finite()
            && price > 0.0
            && price != CORRUPTED_PRICE_SENTINEL
            && price < MAX_VALID_PRICE
    }

    /// Same gate for values that are already decimals (restored snapshots, reference table)
    pub fn is_valid_decimal(price: Decimal) -> bool {
        price > Decimal::ZERO && price != Decimal::ONE && price < dec!(1000000)
    }

    pub fn is_stale(entry: &PriceCacheEntry, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - entry.fetched_at > max_age
    }

    /// Last valid cached price, regardless of age
    pub fn get(&self, asset_id: &str) -> Option<Decimal> {
        self.entries.get(asset_id).map(|e| e.price)
    }

    pub fn entry(&self, asset_id: &str) -> Option<&PriceCacheEntry> {
        self.entries.get(asset_id)
    }

    /// Store a fetched quote. Returns `false` (and keeps the old entry) if it fails validation.
    pub fn set(&mut self, asset_id: &str, price: f64, change_24h: f64) -> bool {
        self.set_at(asset_id, price, change_24h, Utc::now())
    }

    pub fn set_at(&mut self, asset_id: &str, price: f64, change_24h: f64, now: DateTime<Utc>) -> bool {
        if !Self::is_valid(price) {
            tracing::warn!(asset = asset_id, price, "Discarding invalid quote, keeping cached price");
            return false;
        }

        let Some(price) = Decimal::from_f64(price) else {
            tracing::warn!(asset = asset_id, price, "Quote not representable as decimal");
            return false;
        };
        let change_24h = if change_24h.is_finite() {
            Decimal::from_f64(change_24h).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        self.entries.insert(
            asset_id.to_string(),
            PriceCacheEntry {
                price,
                change_24h,
                fetched_at: now,
            },
        );
        true
    }

    /// Walk the fallback chain: cached entry (live if fresh), then reference table.
    /// `None` means no price is known, which callers must treat as unknown, not zero.
    pub fn resolve(&self, asset_id: &str, symbol: &str, now: DateTime<Utc>) -> Option<PriceQuote> {
        if let Some(entry) = self.entries.get(asset_id) {
            let tier = if now - entry.fetched_at <= self.live_window {
                PriceTier::Live
            } else {
                PriceTier::Cached
            };
            return Some(PriceQuote {
                price: entry.price,
                change_24h: entry.change_24h,
                tier,
                fetched_at: Some(entry.fetched_at),
                stale: Self::is_stale(entry, self.stale_after, now),
            });
        }

        self.reference.get(symbol).map(|price| PriceQuote {
            price,
            change_24h: Decimal::ZERO,
            tier: PriceTier::Reference,
            fetched_at: None,
            stale: false,
        })
    }

    pub fn snapshot(&self) -> PriceCacheSnapshot {
        PriceCacheSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Load a persisted snapshot. Entries that fail validation or are older than
    /// the staleness window are dropped; newer in-memory entries win.
    pub fn restore(&mut self, snapshot: PriceCacheSnapshot, now: DateTime<Utc>) -> usize {
        let mut restored = 0;

        for (asset_id, entry) in snapshot.entries {
            if !Self::is_valid_decimal(entry.price) {
                tracing::warn!(asset = %asset_id, price = %entry.price, "Rejecting suspicious cached price");
                continue;
            }
            if Self::is_stale(&entry, self.stale_after, now) {
                tracing::debug!(asset = %asset_id, "Skipping expired cached price");
                continue;
            }

            let newer_in_memory = self
                .entries
                .get(&asset_id)
                .is_some_and(|existing| existing.fetched_at >= entry.fetched_at);
            if !newer_in_memory {
                self.entries.insert(asset_id, entry);
                restored += 1;
            }
        }

        restored
    }

    pub fn reference(&self) -> &ReferencePrices {
        &self.reference
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validity_gate() {
        assert!(!PriceCache::is_valid(1.0));
        assert!(!PriceCache::is_valid(0.0));
        assert!(!PriceCache::is_valid(-5.0));
        assert!(!PriceCache::is_valid(f64::NAN));
        assert!(!PriceCache::is_valid(f64::INFINITY));
        assert!(!PriceCache::is_valid(1_000_000.0));
        assert!(PriceCache::is_valid(42000.0));
        assert!(PriceCache::is_valid(0.000_025));
        assert!(PriceCache::is_valid(1.0 + f64::EPSILON));
        assert!(PriceCache::is_valid(1.0 - f64::EPSILON));
    }

    #[test]
    fn test_sentinel_quote_is_rejected_and_prior_value_kept() {
        let mut cache = PriceCache::default();
        assert!(!cache.set("cronos", 1.0, 0.0));
        assert_eq!(cache.get("cronos"), None);

        assert!(cache.set("cronos", 0.18, 3.0));
        assert!(!cache.set("cronos", 1.0, 0.0));
        assert_eq!(cache.get("cronos"), Some(dec!(0.18)));
    }

    #[test]
    fn test_valid_fetch_overwrites_and_resets_timestamp() {
        let mut cache = PriceCache::default();
        let earlier = Utc::now() - Duration::hours(2);
        cache.set_at("bitcoin", 90000.0, 1.0, earlier);

        let now = Utc::now();
        cache.set_at("bitcoin", 95000.0, 2.0, now);
        let entry = cache.entry("bitcoin").unwrap();
        assert_eq!(entry.price, dec!(95000));
        assert_eq!(entry.fetched_at, now);
    }

    #[test]
    fn test_fallback_chain_tiers() {
        let mut cache = PriceCache::default();
        let now = Utc::now();

        cache.set_at("bitcoin", 95000.0, 2.5, now);
        let live = cache.resolve("bitcoin", "BTC", now).unwrap();
        assert_eq!(live.tier, PriceTier::Live);

        let later = now + Duration::hours(30);
        let cached = cache.resolve("bitcoin", "BTC", later).unwrap();
        assert_eq!(cached.tier, PriceTier::Cached);
        assert!(cached.stale);
        assert_eq!(cached.price, dec!(95000));

        let reference = cache.resolve("ethereum", "ETH", now).unwrap();
        assert_eq!(reference.tier, PriceTier::Reference);

        assert!(cache.resolve("unknown-coin", "ZZZ", now).is_none());
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let entry = PriceCacheEntry {
            price: dec!(10),
            change_24h: Decimal::ZERO,
            fetched_at: now - Duration::hours(25),
        };
        assert!(PriceCache::is_stale(&entry, Duration::hours(24), now));
        assert!(!PriceCache::is_stale(&entry, Duration::hours(26), now));
    }

    #[test]
    fn test_restore_filters_invalid_and_expired() {
        let now = Utc::now();
        let mut snapshot = PriceCacheSnapshot::default();
        let entry = |price, age_hours| PriceCacheEntry {
            price,
            change_24h: Decimal::ZERO,
            fetched_at: now - Duration::hours(age_hours),
        };
        snapshot.entries.insert("bitcoin".into(), entry(dec!(95000), 1));
        snapshot.entries.insert("cardano".into(), entry(Decimal::ONE, 1));
        snapshot.entries.insert("solana".into(), entry(dec!(200), 48));

        let mut cache = PriceCache::default();
        assert_eq!(cache.restore(snapshot, now), 1);
        assert_eq!(cache.get("bitcoin"), Some(dec!(95000)));
        assert_eq!(cache.get("cardano"), None);
        assert_eq!(cache.get("solana"), None);
    }
}
