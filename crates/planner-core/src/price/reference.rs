//! Static reference prices
//!
//! Last-resort fallback when neither a live nor a cached quote exists.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::PriceCache;

/// Symbol -> reference price table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferencePrices {
    prices: HashMap<String, Decimal>,
}

impl Default for ReferencePrices {
    fn default() -> Self {
        let mut table = Self::empty();
        for (symbol, price) in [
            ("BTC", dec!(95000)),
            ("ETH", dec!(3600)),
            ("BNB", dec!(650)),
            ("SOL", dec!(200)),
            ("ADA", dec!(0.87)),
            ("XRP", dec!(2.20)),
            ("DOT", dec!(7.50)),
            ("DOGE", dec!(0.32)),
            ("AVAX", dec!(40)),
            ("LINK", dec!(23)),
            ("MATIC", dec!(0.45)),
            ("LTC", dec!(100)),
            ("UNI", dec!(15)),
            ("BCH", dec!(450)),
            ("XLM", dec!(0.35)),
            ("CRO", dec!(0.18)),
            ("SHIB", dec!(0.000025)),
            ("TRX", dec!(0.25)),
            ("ATOM", dec!(8)),
            ("XMR", dec!(150)),
            ("ALGO", dec!(0.15)),
            ("VET", dec!(0.02)),
            ("FIL", dec!(5)),
            ("NEO", dec!(12)),
            ("DASH", dec!(30)),
            ("ZEC", dec!(25)),
        ] {
            table.insert(symbol, price);
        }
        table
    }
}

impl ReferencePrices {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or replace a reference price. Values failing the cache validity gate are ignored.
    pub fn insert(&mut self, symbol: &str, price: Decimal) -> bool {
        if !PriceCache::is_valid_decimal(price) {
            tracing::warn!(symbol, price = %price, "Ignoring invalid reference price");
            return false;
        }
        self.prices.insert(symbol.trim().to_uppercase(), price);
        true
    }

    #[must_use]
    pub fn with(mut self, symbol: &str, price: Decimal) -> Self {
        self.insert(symbol, price);
        self
    }

    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(&symbol.trim().to_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = ReferencePrices::default();
        assert_eq!(table.get("btc"), Some(dec!(95000)));
        assert_eq!(table.get("NOPE"), None);
    }

    #[test]
    fn test_sentinel_reference_price_is_ignored() {
        let table = ReferencePrices::empty().with("XTZ", Decimal::ONE).with("FIL", dec!(5));
        assert_eq!(table.get("XTZ"), None);
        assert_eq!(table.len(), 1);
    }
}
