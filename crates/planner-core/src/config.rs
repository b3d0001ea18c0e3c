//! Planner Configuration
//!
//! Tax/tithe rates and refresh timings. Every value has a default and can be
//! overridden through `EXIT_PLANNER_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{PlannerError, Result};

pub const ENV_TAX_RATE: &str = "EXIT_PLANNER_TAX_RATE";
pub const ENV_TITHE_RATE: &str = "EXIT_PLANNER_TITHE_RATE";
pub const ENV_PRICE_REFRESH_SECS: &str = "EXIT_PLANNER_PRICE_REFRESH_SECS";
pub const ENV_TICKER_REFRESH_SECS: &str = "EXIT_PLANNER_TICKER_REFRESH_SECS";
pub const ENV_PRICE_STALE_SECS: &str = "EXIT_PLANNER_PRICE_STALE_SECS";
pub const ENV_LIVE_WINDOW_SECS: &str = "EXIT_PLANNER_LIVE_WINDOW_SECS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Tax on realized gains (fraction, 0.22 = 22%)
    pub tax_rate: Decimal,

    /// Tithe on gross proceeds (fraction)
    pub tithe_rate: Decimal,

    /// Interval between price fetch cycles
    pub price_refresh: Duration,

    /// Interval between portfolio summary ticks
    pub ticker_refresh: Duration,

    /// Age after which a cached quote is reported stale and dropped on restore
    pub price_stale_after: Duration,

    /// Quotes younger than this are reported as live
    pub live_window: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.22),
            tithe_rate: dec!(0.10),
            price_refresh: Duration::from_secs(30),
            ticker_refresh: Duration::from_secs(60),
            price_stale_after: Duration::from_secs(24 * 60 * 60),
            live_window: Duration::from_secs(30),
        }
    }
}

impl PlannerConfig {
    /// Build from process environment, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, dotenv map, tests)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rate = |key: &str, fallback: Decimal| {
            lookup(key).map_or(fallback, |raw| match Decimal::from_str(raw.trim()) {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable rate");
                    fallback
                }
            })
        };

        let secs = |key: &str, fallback: Duration| {
            lookup(key).map_or(fallback, |raw| match raw.trim().parse::<u64>() {
                Ok(value) => Duration::from_secs(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable interval");
                    fallback
                }
            })
        };

        Self {
            tax_rate: rate(ENV_TAX_RATE, defaults.tax_rate),
            tithe_rate: rate(ENV_TITHE_RATE, defaults.tithe_rate),
            price_refresh: secs(ENV_PRICE_REFRESH_SECS, defaults.price_refresh),
            ticker_refresh: secs(ENV_TICKER_REFRESH_SECS, defaults.ticker_refresh),
            price_stale_after: secs(ENV_PRICE_STALE_SECS, defaults.price_stale_after),
            live_window: secs(ENV_LIVE_WINDOW_SECS, defaults.live_window),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [("tax_rate", self.tax_rate), ("tithe_rate", self.tithe_rate)] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(PlannerError::Config(format!(
                    "{name} must be within [0, 1], got {rate}"
                )));
            }
        }

        if self.price_refresh.is_zero() || self.ticker_refresh.is_zero() {
            return Err(PlannerError::Config("refresh intervals must be non-zero".into()));
        }

        Ok(())
    }

    /// Staleness window as a chrono duration for timestamp arithmetic
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.price_stale_after).unwrap_or(chrono::Duration::MAX)
    }

    pub fn live_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.live_window).unwrap_or(chrono::Duration::MAX)
    }
}
