//! # planner-feeds
//!
//! Live price sources for the exit planner.
//!
//! ## Sources
//!
//! - **CoinGecko**: `simple/price` quotes with 24h change, batched by id
//!
//! ## Usage
//!
//! ```rust,ignore
//! use planner_feeds::CoinGeckoPriceSource;
//!
//! let source = Arc::new(CoinGeckoPriceSource::from_env()?);
//! let refresher = PriceRefresher::new(source, cache);
//! let report = refresher.refresh(&store.tracked_assets()).await;
//! ```

pub mod coingecko;

pub use coingecko::{CoinGeckoConfig, CoinGeckoPriceSource};

// Re-export core types for convenience
pub use planner_core::{PlannerError, PriceSource, RawQuote, Result};
