//! Market data boundary
//!
//! Pool listings come from a [`MarketDataSource`]. An empty list is a
//! valid "no opportunity" outcome; a fetch failure is reported to the
//! caller, which downgrades it to a warning.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::amount::{compound_rate, decimal_from_f64};
use crate::config::MarketConfig;

/// One NAV/price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// Normalized pool listing, input to the score engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub pool_id: String,
    pub chain: String,
    pub project: String,
    pub symbol: String,
    /// Annualized yield as a fraction (0.05 = 5%)
    pub apy: Decimal,
    /// Annualized fee as a fraction
    pub fee_rate: Decimal,
    pub risk_score: Decimal,
    pub tvl_usd: Decimal,
    #[serde(default)]
    pub apy_age_minutes: Option<Decimal>,
    #[serde(default)]
    pub history: Vec<PricePoint>,
    /// Upstream listing id, used for history lookups
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Which listings to fetch
#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    /// Lowercase chain names; empty means all
    pub chains: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("market request failed: {0}")]
    Request(String),

    #[error("invalid market response: {0}")]
    InvalidResponse(String),
}

/// Source of candidate pools
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candidates(&self, filter: &MarketFilter) -> Result<Vec<PoolRecord>, MarketError>;
}

/// DefiLlama yields API
pub struct DefiLlamaSource {
    client: Client,
    base_url: String,
    default_fee_rate: Decimal,
    /// Fetch `/chart/{pool}` for every listing
    history_enabled: bool,
    history_days: i64,
}

#[derive(Debug, Deserialize)]
struct LlamaResponse {
    #[serde(default)]
    data: Vec<LlamaPool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlamaPool {
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    apy: Option<f64>,
    #[serde(default)]
    tvl_usd: Option<f64>,
    #[serde(default)]
    risk_factor: Option<serde_json::Value>,
    #[serde(default)]
    fee: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LlamaChart {
    #[serde(default)]
    data: Vec<LlamaChartPoint>,
}

#[derive(Debug, Deserialize)]
struct LlamaChartPoint {
    timestamp: serde_json::Value,
    #[serde(default)]
    apy: Option<f64>,
}

impl DefiLlamaSource {
    pub fn new(cfg: &MarketConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            default_fee_rate: cfg.default_fee_rate,
            history_enabled: false,
            history_days: cfg.history_days,
        })
    }

    /// Attach APY history to each listing; needed for trend blending
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    async fn fetch_history(&self, source_id: &str) -> Result<Vec<PricePoint>, MarketError> {
        let url = format!("{}/chart/{}", self.base_url, source_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::Request(format!("GET {} returned {}", url, resp.status())));
        }

        let chart: LlamaChart = resp
            .json()
            .await
            .map_err(|e| MarketError::InvalidResponse(e.to_string()))?;

        let observations: Vec<(DateTime<Utc>, Decimal)> = chart
            .data
            .into_iter()
            .filter_map(|p| {
                let apy = p.apy.filter(|a| a.is_finite())?;
                Some((parse_timestamp(&p.timestamp)?, decimal_from_f64(apy / 100.0)))
            })
            .collect();
        Ok(nav_series(observations, chrono::Duration::days(self.history_days.max(1))))
    }

    fn normalize(&self, raw: LlamaPool) -> PoolRecord {
        let chain = raw.chain.unwrap_or_else(|| "unknown".to_string()).to_lowercase();
        let project = raw.project.unwrap_or_else(|| "unknown".to_string());
        let symbol = raw.symbol.unwrap_or_default();
        let address = raw.pool.unwrap_or_default();
        let key = if symbol.is_empty() { &address } else { &symbol };
        let pool_id = format!("{}:{}:{}", chain, project, key).to_lowercase();

        // API sometimes returns percent (0-100)
        let apy_raw = raw.apy.filter(|a| a.is_finite()).unwrap_or(0.0);
        let apy = if apy_raw > 2.0 { apy_raw / 100.0 } else { apy_raw };

        PoolRecord {
            pool_id,
            chain,
            project,
            symbol,
            apy: decimal_from_f64(apy),
            fee_rate: extract_fee(raw.fee.as_ref()).unwrap_or(self.default_fee_rate),
            risk_score: extract_risk(raw.risk_factor.as_ref()),
            tvl_usd: decimal_from_f64(raw.tvl_usd.unwrap_or(0.0)),
            apy_age_minutes: None,
            history: Vec::new(),
            source_id: Some(address).filter(|a| !a.is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for DefiLlamaSource {
    fn name(&self) -> &str {
        "defillama"
    }

    async fn fetch_candidates(&self, filter: &MarketFilter) -> Result<Vec<PoolRecord>, MarketError> {
        let url = format!("{}/pools", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::Request(format!("GET {} returned {}", url, resp.status())));
        }

        let payload: LlamaResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::InvalidResponse(e.to_string()))?;

        let chains: Vec<String> = filter.chains.iter().map(|c| c.to_lowercase()).collect();
        let pools: Vec<PoolRecord> = payload
            .data
            .into_iter()
            .filter(|raw| {
                let chain = raw.chain.as_deref().unwrap_or("").to_lowercase();
                chains.is_empty() || chains.contains(&chain)
            })
            .map(|raw| self.normalize(raw))
            .collect();

        let mut pools = dedupe_by_tvl(pools);
        debug!("defillama: {} pools after filtering", pools.len());

        if self.history_enabled {
            for pool in pools.iter_mut() {
                let Some(source_id) = pool.source_id.clone() else { continue };
                match self.fetch_history(&source_id).await {
                    Ok(history) => pool.history = history,
                    Err(e) => warn!("History for {} unavailable: {}", pool.pool_id, e),
                }
            }
        }
        Ok(pools)
    }
}

/// Keep the highest-TVL listing per pool id
pub fn dedupe_by_tvl(pools: Vec<PoolRecord>) -> Vec<PoolRecord> {
    let mut best: HashMap<String, PoolRecord> = HashMap::new();
    for pool in pools {
        match best.get(&pool.pool_id) {
            Some(existing) if existing.tvl_usd >= pool.tvl_usd => {}
            _ => {
                best.insert(pool.pool_id.clone(), pool);
            }
        }
    }
    let mut out: Vec<PoolRecord> = best.into_values().collect();
    out.sort_by(|a, b| a.pool_id.cmp(&b.pool_id));
    out
}

/// Chart timestamps arrive as RFC 3339 strings or unix seconds
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        _ => None,
    }
}

/// NAV series from APY observations, starting at 1.0
///
/// Each step compounds the previous observation's APY over the gap. Only
/// points within `lookback` of the newest one are kept.
pub fn nav_series(mut observations: Vec<(DateTime<Utc>, Decimal)>, lookback: chrono::Duration) -> Vec<PricePoint> {
    observations.sort_by_key(|(at, _)| *at);
    let Some(newest) = observations.last().map(|(at, _)| *at) else {
        return Vec::new();
    };
    observations.retain(|(at, _)| newest - *at <= lookback);

    let year = Decimal::from(365 * 86_400);
    let mut out: Vec<PricePoint> = Vec::with_capacity(observations.len());
    let mut nav = Decimal::ONE;
    let mut previous: Option<(DateTime<Utc>, Decimal)> = None;
    for (at, apy) in observations {
        if let Some((prev_at, prev_apy)) = previous {
            let years = Decimal::from((at - prev_at).num_seconds()) / year;
            nav *= Decimal::ONE + compound_rate(prev_apy, years);
        }
        out.push(PricePoint { timestamp: at, price: nav });
        previous = Some((at, apy));
    }
    out
}

fn extract_risk(value: Option<&serde_json::Value>) -> Decimal {
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::Object(map)) => ["score", "value", "riskScore"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_f64())),
        _ => None,
    };
    match number {
        Some(r) => decimal_from_f64(r.clamp(0.0, 1.0)),
        None => Decimal::ZERO,
    }
}

fn extract_fee(value: Option<&serde_json::Value>) -> Option<Decimal> {
    let fee = match value? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => match s.trim_matches(|c| c == '%' || c == ' ').parse::<f64>() {
            Ok(pct) => pct / 100.0,
            Err(_) => {
                warn!("Unparseable fee '{}'", s);
                return None;
            }
        },
        _ => return None,
    };
    Some(decimal_from_f64(fee.max(0.0)))
}

/// Fixed listings, used in paper runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pools: Vec<PoolRecord>,
}

impl StaticSource {
    pub fn new(pools: Vec<PoolRecord>) -> Self {
        Self { pools }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_candidates(&self, filter: &MarketFilter) -> Result<Vec<PoolRecord>, MarketError> {
        Ok(self
            .pools
            .iter()
            .filter(|p| filter.chains.is_empty() || filter.chains.iter().any(|c| c.eq_ignore_ascii_case(&p.chain)))
            .cloned()
            .collect())
    }
}
