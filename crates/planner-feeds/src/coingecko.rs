//! CoinGecko Price Source
//!
//! Implementation of `PriceSource` over the public `simple/price` endpoint.
//! Asset ids are CoinGecko ids (`bitcoin`, `avalanche-2`, ...). Ids are
//! batched into one request per chunk; values are passed through unvalidated
//! and the cache decides what to keep.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use planner_core::{PlannerError, PriceSource, RawQuote, Result};
use serde::Deserialize;

pub const ENV_BASE_URL: &str = "COINGECKO_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "COINGECKO_TIMEOUT_SECS";
pub const ENV_API_KEY: &str = "COINGECKO_API_KEY";

/// Ids per request; CoinGecko rejects very long id lists
const MAX_IDS_PER_REQUEST: usize = 50;

#[derive(Clone, Debug)]
pub struct CoinGeckoConfig {
    /// API root, without trailing slash
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Demo/pro API key, sent as `x-cg-demo-api-key`
    pub api_key: Option<String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".into(),
            timeout_secs: 10,
            api_key: None,
        }
    }
}

impl CoinGeckoConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            base_url: lookup(ENV_BASE_URL)
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.base_url),
            timeout_secs: lookup(ENV_TIMEOUT_SECS)
                .and_then(|t| t.trim().parse().ok())
                .filter(|&t| t > 0)
                .unwrap_or(defaults.timeout_secs),
            api_key: lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
}

/// Split a `simple/price` body into per-asset results. Assets missing from
/// the body (or without a `usd` field) are reported unavailable.
pub fn parse_simple_price(body: &str, asset_ids: &[String]) -> Result<Vec<(String, Result<RawQuote>)>> {
    let parsed: HashMap<String, SimplePrice> = serde_json::from_str(body)?;

    Ok(asset_ids
        .iter()
        .map(|id| {
            let quote = parsed
                .get(id)
                .and_then(|entry| {
                    entry
                        .usd
                        .map(|usd| RawQuote::new(usd, entry.usd_24h_change.unwrap_or(0.0)))
                })
                .ok_or_else(|| PlannerError::PriceUnavailable(id.clone()));
            (id.clone(), quote)
        })
        .collect())
}

pub struct CoinGeckoPriceSource {
    http: reqwest::Client,
    config: CoinGeckoConfig,
}

impl CoinGeckoPriceSource {
    pub fn new(config: CoinGeckoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PlannerError::Config(format!("http client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CoinGeckoConfig::from_env())
    }

    fn simple_price_url(&self) -> String {
        format!("{}/simple/price", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_chunk(&self, asset_ids: &[String]) -> anyhow::Result<String> {
        let ids = asset_ids.join(",");
        let mut request = self.http.get(self.simple_price_url()).query(&[
            ("ids", ids.as_str()),
            ("vs_currencies", "usd"),
            ("include_24hr_change", "true"),
        ]);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request.send().await.context("coingecko request failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("coingecko response body read failed")?;

        if !status.is_success() {
            return Err(anyhow!("coingecko http error status={}", status.as_u16()));
        }
        Ok(body)
    }

    async fn fetch_batch(&self, asset_ids: &[String]) -> Vec<(String, Result<RawQuote>)> {
        let outcome = match self.fetch_chunk(asset_ids).await {
            Ok(body) => parse_simple_price(&body, asset_ids),
            Err(e) => Err(PlannerError::Source(format!("{e:#}"))),
        };

        match outcome {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(assets = asset_ids.len(), error = %e, "CoinGecko batch failed");
                let message = e.to_string();
                asset_ids
                    .iter()
                    .map(|id| (id.clone(), Err(PlannerError::Source(message.clone()))))
                    .collect()
            }
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn fetch_price(&self, asset_id: &str) -> Result<RawQuote> {
        let ids = [asset_id.to_string()];
        self.fetch_batch(&ids)
            .await
            .pop()
            .map_or_else(|| Err(PlannerError::PriceUnavailable(asset_id.to_string())), |(_, quote)| quote)
    }

    async fn fetch_prices(&self, asset_ids: &[String]) -> Vec<(String, Result<RawQuote>)> {
        let batches = asset_ids
            .chunks(MAX_IDS_PER_REQUEST)
            .map(|chunk| self.fetch_batch(chunk));

        futures::future::join_all(batches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn name(&self) -> &str {
        "CoinGecko"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_simple_price() {
        let body = r#"{
            "bitcoin": {"usd": 97123.5, "usd_24h_change": -1.25},
            "crypto-com-chain": {"usd": 1.0},
            "broken": {}
        }"#;

        let results = parse_simple_price(body, &ids(&["bitcoin", "crypto-com-chain", "broken", "missing"])).unwrap();
        assert_eq!(results.len(), 4);

        let btc = results[0].1.as_ref().unwrap();
        assert!((btc.usd - 97123.5).abs() < f64::EPSILON);
        assert!((btc.change_24h + 1.25).abs() < f64::EPSILON);

        // sentinel values are passed through; the cache rejects them
        assert!(results[1].1.is_ok());
        assert!(matches!(results[2].1, Err(PlannerError::PriceUnavailable(_))));
        assert!(matches!(results[3].1, Err(PlannerError::PriceUnavailable(_))));
    }

    #[test]
    fn test_parse_rejects_malformed_body() {
        assert!(parse_simple_price("<html>rate limited</html>", &ids(&["bitcoin"])).is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = CoinGeckoConfig::from_lookup(|key| match key {
            ENV_BASE_URL => Some("http://localhost:8080/api/".into()),
            ENV_TIMEOUT_SECS => Some("0".into()),
            _ => None,
        });
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.timeout_secs, 10);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_every_asset() {
        let source = CoinGeckoPriceSource::new(CoinGeckoConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            api_key: None,
        })
        .unwrap();

        let results = source.fetch_prices(&ids(&["bitcoin", "ethereum"])).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| matches!(r, Err(PlannerError::Source(_)))));
    }
}
