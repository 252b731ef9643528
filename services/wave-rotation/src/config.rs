//! Controller Configuration
//!
//! Layered load: built-in defaults, then an optional config file, then
//! `WAVE__SECTION__KEY` environment overrides. `validate()` turns every bad
//! setting into a [`ConfigError`] before a cycle can start.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Shortest cycle the settlement arithmetic accepts
pub const MIN_CYCLE_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Full controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub run_lock: RunLockConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub autopause: AutopauseConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Pool id -> venue spec
    #[serde(default)]
    pub venues: BTreeMap<String, VenueSpec>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            cycle_interval_secs: default_cycle_interval_secs(),
            state_dir: None,
            log_level: default_log_level(),
            scoring: ScoringConfig::default(),
            selection: SelectionConfig::default(),
            policy: PolicyConfig::default(),
            guard: GuardConfig::default(),
            network: NetworkConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            run_lock: RunLockConfig::default(),
            settlement: SettlementConfig::default(),
            autopause: AutopauseConfig::default(),
            treasury: TreasuryConfig::default(),
            market: MarketConfig::default(),
            notify: NotifyConfig::default(),
            venues: BTreeMap::new(),
        }
    }
}

fn default_cycle_interval_secs() -> u64 { 86_400 }
fn default_log_level() -> String { "info".to_string() }

impl ControllerConfig {
    /// Load defaults, an optional file and `WAVE__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("wave-rotation").required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WAVE")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: ControllerConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        cfg.apply_legacy_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Plain environment names used by existing deployments
    fn apply_legacy_env(&mut self) {
        if self.network.endpoints.is_empty() {
            if let Ok(urls) = std::env::var("RPC_URLS") {
                self.network.endpoints = split_list(&urls);
            } else if let Ok(primary) = std::env::var("RPC_URL") {
                let mut endpoints = vec![primary.trim().to_string()];
                if let Ok(fallbacks) = std::env::var("RPC_FALLBACKS") {
                    endpoints.extend(split_list(&fallbacks));
                }
                self.network.endpoints = endpoints;
            }
        }
        if self.notify.telegram_token.is_none() {
            self.notify.telegram_token = std::env::var("TELEGRAM_TOKEN").ok();
        }
        if self.notify.telegram_chat_id.is_none() {
            self.notify.telegram_chat_id = std::env::var("TELEGRAM_CHAT_ID").ok();
        }
    }

    /// Reject settings a cycle cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval_secs < MIN_CYCLE_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "cycle_interval_secs",
                format!("must be >= {}", MIN_CYCLE_INTERVAL_SECS),
            ));
        }
        if self.mode == ExecutionMode::Live && self.network.endpoints.is_empty() {
            return Err(ConfigError::Missing("network.endpoints".to_string()));
        }
        for (i, url) in self.network.endpoints.iter().enumerate() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    format!("network.endpoints[{}]", i),
                    format!("not an http(s) url: {}", url),
                ));
            }
        }
        if self.network.allowed_chain_ids.is_empty() {
            return Err(ConfigError::Missing("network.allowed_chain_ids".to_string()));
        }
        if self.network.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("network.retry.max_attempts", "must be >= 1"));
        }
        if self.policy.min_delta < Decimal::ZERO {
            return Err(ConfigError::invalid("policy.min_delta", "must be >= 0"));
        }
        if self.guard.safety_multiplier < Decimal::ONE {
            return Err(ConfigError::invalid("guard.safety_multiplier", "must be >= 1"));
        }
        if self.guard.horizon_cycles <= Decimal::ZERO {
            return Err(ConfigError::invalid("guard.horizon_cycles", "must be > 0"));
        }
        if self.kill_switch.threshold == 0 {
            return Err(ConfigError::invalid("kill_switch.threshold", "must be >= 1"));
        }
        if self.settlement.reinvest_ratio < Decimal::ZERO || self.settlement.reinvest_ratio > Decimal::ONE {
            return Err(ConfigError::invalid("settlement.reinvest_ratio", "must be within [0, 1]"));
        }
        if self.settlement.initial_capital < Decimal::ZERO {
            return Err(ConfigError::invalid("settlement.initial_capital", "must be >= 0"));
        }
        if self.settlement.decimal_places > 28 {
            return Err(ConfigError::invalid("settlement.decimal_places", "must be <= 28"));
        }
        if self.autopause.streak == 0 {
            return Err(ConfigError::invalid("autopause.streak", "must be >= 1"));
        }
        let weights = &self.scoring.trend.weights;
        if [weights.yield_weight, weights.trend, weights.volatility, weights.drawdown]
            .iter()
            .any(|w| *w < 0.0 || !w.is_finite())
        {
            return Err(ConfigError::invalid("scoring.trend.weights", "weights must be finite and >= 0"));
        }
        if self.scoring.trend.min_observations < 3 {
            return Err(ConfigError::invalid("scoring.trend.min_observations", "must be >= 3"));
        }
        if self.treasury.enabled {
            if self.treasury.slippage_bps < MIN_SLIPPAGE_BPS {
                return Err(ConfigError::invalid(
                    "treasury.slippage_bps",
                    format!("must be >= {}", MIN_SLIPPAGE_BPS),
                ));
            }
            validate_address("treasury.buy_token", &self.treasury.buy_token)?;
            match &self.treasury.taker {
                Some(taker) => validate_address("treasury.taker", taker)?,
                None => return Err(ConfigError::Missing("treasury.taker".to_string())),
            }
        }
        for (pool_id, spec) in &self.venues {
            crate::venue::VenueKind::from_spec(pool_id, spec)?;
        }
        Ok(())
    }

    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".wave-rotation")
        })
    }

    /// Cycle length as a fraction of a day
    pub fn interval_factor(&self) -> Decimal {
        Decimal::from(self.cycle_interval_secs) / Decimal::from(86_400u64)
    }

    /// Compounding periods per year for the configured cadence
    pub fn periods_per_year(&self) -> Decimal {
        Decimal::from(365u64 * 86_400) / Decimal::from(self.cycle_interval_secs.max(1))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `0x` followed by 40 hex digits
pub fn validate_address(key: &str, value: &str) -> Result<(), ConfigError> {
    let hex = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"));
    match hex {
        Some(hex) if hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
        _ => Err(ConfigError::InvalidAddress {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub penalties: PenaltyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
    #[serde(default = "default_z_clip")]
    pub z_clip: f64,
    #[serde(default)]
    pub weights: BlendWeights,
    #[serde(default = "default_volatility_cap")]
    pub volatility_cap: f64,
    #[serde(default = "default_drawdown_cap")]
    pub drawdown_cap: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_observations: default_min_observations(),
            volatility_window: default_volatility_window(),
            z_clip: default_z_clip(),
            weights: BlendWeights::default(),
            volatility_cap: default_volatility_cap(),
            drawdown_cap: default_drawdown_cap(),
        }
    }
}

fn default_min_observations() -> usize { 8 }
fn default_volatility_window() -> usize { 14 }
fn default_z_clip() -> f64 { 3.0 }
fn default_volatility_cap() -> f64 { 0.05 }
fn default_drawdown_cap() -> f64 { 0.25 }

/// Raw blend weights; renormalized to sum to 1 before use
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct BlendWeights {
    #[serde(default = "default_yield_weight", rename = "yield")]
    pub yield_weight: f64,
    #[serde(default = "default_trend_weight")]
    pub trend: f64,
    #[serde(default = "default_volatility_weight")]
    pub volatility: f64,
    #[serde(default = "default_drawdown_weight")]
    pub drawdown: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            yield_weight: default_yield_weight(),
            trend: default_trend_weight(),
            volatility: default_volatility_weight(),
            drawdown: default_drawdown_weight(),
        }
    }
}

fn default_yield_weight() -> f64 { 0.6 }
fn default_trend_weight() -> f64 { 0.2 }
fn default_volatility_weight() -> f64 { 0.1 }
fn default_drawdown_weight() -> f64 { 0.1 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PenaltyConfig {
    /// Skip staleness and TVL penalties entirely
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_max_apy_staleness_min")]
    pub max_apy_staleness_min: Decimal,
    #[serde(default = "default_tvl_penalty_usd")]
    pub tvl_penalty_usd: Decimal,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            aggressive: false,
            max_apy_staleness_min: default_max_apy_staleness_min(),
            tvl_penalty_usd: default_tvl_penalty_usd(),
        }
    }
}

fn default_max_apy_staleness_min() -> Decimal { Decimal::from(60) }
fn default_tvl_penalty_usd() -> Decimal { Decimal::from(500_000) }

// ---------------------------------------------------------------------------
// Selection / policy / guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionConfig {
    /// Empty means every chain
    #[serde(default = "default_chains")]
    pub chains: Vec<String>,
    #[serde(default)]
    pub min_tvl_usd: Decimal,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            chains: default_chains(),
            min_tvl_usd: Decimal::ZERO,
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

fn default_chains() -> Vec<String> { vec!["base".to_string()] }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Relative improvement required to switch
    #[serde(default = "default_min_delta")]
    pub min_delta: Decimal,
    /// Minimum dwell time after a switch; 0 disables
    #[serde(default)]
    pub cooldown_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            cooldown_secs: 0,
        }
    }
}

fn default_min_delta() -> Decimal { Decimal::new(1, 2) }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardConfig {
    /// A disabled guard allows every move the switch policy wants
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub min_gain_base: Decimal,
    #[serde(default)]
    pub min_gain_fiat: Option<Decimal>,
    #[serde(default = "default_fx_fiat_per_base")]
    pub fiat_per_base: Decimal,
    #[serde(default = "default_safety_multiplier")]
    pub safety_multiplier: Decimal,
    /// Cycles over which the score delta is expected to persist
    #[serde(default = "default_horizon_cycles")]
    pub horizon_cycles: Decimal,
    #[serde(default = "default_withdraw_units")]
    pub withdraw_units: u64,
    #[serde(default = "default_deposit_units")]
    pub deposit_units: u64,
    #[serde(default = "default_approve_units")]
    pub approve_units: u64,
    #[serde(default)]
    pub gas_price_max_gwei: Option<Decimal>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gain_base: Decimal::ZERO,
            min_gain_fiat: None,
            fiat_per_base: default_fx_fiat_per_base(),
            safety_multiplier: default_safety_multiplier(),
            horizon_cycles: default_horizon_cycles(),
            withdraw_units: default_withdraw_units(),
            deposit_units: default_deposit_units(),
            approve_units: default_approve_units(),
            gas_price_max_gwei: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_fx_fiat_per_base() -> Decimal { Decimal::from(3000) }
fn default_safety_multiplier() -> Decimal { Decimal::ONE }
fn default_horizon_cycles() -> Decimal { Decimal::ONE }
fn default_withdraw_units() -> u64 { 280_000 }
fn default_deposit_units() -> u64 { 200_000 }
fn default_approve_units() -> u64 { 60_000 }

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Ranked endpoints; index 0 is probed first
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_allowed_chain_ids")]
    pub allowed_chain_ids: Vec<u64>,
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_block_staleness_secs")]
    pub max_block_staleness_secs: i64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            allowed_chain_ids: default_allowed_chain_ids(),
            timeout_secs: default_rpc_timeout_secs(),
            max_block_staleness_secs: default_max_block_staleness_secs(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_allowed_chain_ids() -> Vec<u64> { vec![8453, 84532] }
fn default_rpc_timeout_secs() -> u64 { 20 }
fn default_max_block_staleness_secs() -> i64 { 90 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Fractional jitter, e.g. 0.25 for +/-25%
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_base: default_backoff_base(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_backoff_base() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.25 }

// ---------------------------------------------------------------------------
// Safety state machines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KillSwitchConfig {
    #[serde(default = "default_kill_threshold")]
    pub threshold: u32,
    #[serde(default = "default_kill_reset_timeout_secs")]
    pub reset_timeout_secs: i64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            threshold: default_kill_threshold(),
            reset_timeout_secs: default_kill_reset_timeout_secs(),
        }
    }
}

fn default_kill_threshold() -> u32 { 3 }
fn default_kill_reset_timeout_secs() -> i64 { 3_600 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunLockConfig {
    #[serde(default = "default_lock_stale_after_secs")]
    pub stale_after_secs: i64,
}

impl Default for RunLockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

fn default_lock_stale_after_secs() -> i64 { 3_600 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
    #[serde(default = "default_reinvest_ratio")]
    pub reinvest_ratio: Decimal,
    #[serde(default = "default_fx_fiat_per_base")]
    pub fx_fiat_per_base: Decimal,
    #[serde(default = "default_min_payout_fiat")]
    pub min_payout_fiat: Decimal,
    /// Daily stop-loss, scaled to the cycle length
    #[serde(default = "default_stop_loss_daily")]
    pub stop_loss_daily: Decimal,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            reinvest_ratio: default_reinvest_ratio(),
            fx_fiat_per_base: default_fx_fiat_per_base(),
            min_payout_fiat: default_min_payout_fiat(),
            stop_loss_daily: default_stop_loss_daily(),
            decimal_places: default_decimal_places(),
            initial_capital: default_initial_capital(),
        }
    }
}

fn default_reinvest_ratio() -> Decimal { Decimal::new(5, 1) }
fn default_min_payout_fiat() -> Decimal { Decimal::new(5, 1) }
fn default_stop_loss_daily() -> Decimal { Decimal::new(-10, 2) }
fn default_decimal_places() -> u32 { 18 }
fn default_initial_capital() -> Decimal { Decimal::from(100) }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutopauseConfig {
    #[serde(default = "default_autopause_streak")]
    pub streak: u32,
    #[serde(default = "default_resume_wait_minutes")]
    pub resume_wait_minutes: i64,
    #[serde(default = "default_resume_cooldown_minutes")]
    pub resume_cooldown_minutes: i64,
    /// Per-cycle rate at or above which a paused controller may resume early
    #[serde(default)]
    pub fast_signal_min: Decimal,
}

impl Default for AutopauseConfig {
    fn default() -> Self {
        Self {
            streak: default_autopause_streak(),
            resume_wait_minutes: default_resume_wait_minutes(),
            resume_cooldown_minutes: default_resume_cooldown_minutes(),
            fast_signal_min: Decimal::ZERO,
        }
    }
}

fn default_autopause_streak() -> u32 { 3 }
fn default_resume_wait_minutes() -> i64 { 360 }
fn default_resume_cooldown_minutes() -> i64 { 5 }

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

pub const MIN_SLIPPAGE_BPS: u32 = 10;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TreasuryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_sell_token")]
    pub sell_token: String,
    #[serde(default = "default_buy_token")]
    pub buy_token: String,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_min_swap_base")]
    pub min_swap_base: Decimal,
    #[serde(default)]
    pub taker: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quote_url: default_quote_url(),
            api_key: None,
            sell_token: default_sell_token(),
            buy_token: default_buy_token(),
            slippage_bps: default_slippage_bps(),
            min_swap_base: default_min_swap_base(),
            taker: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_quote_url() -> String { "https://base.api.0x.org/swap/v1/quote".to_string() }
fn default_sell_token() -> String { "ETH".to_string() }
// EURC on Base
fn default_buy_token() -> String { "0x60a3E35Cc302bFA44Cb288Bc5a4F316Fdb1adb42".to_string() }
fn default_slippage_bps() -> u32 { 100 }
fn default_min_swap_base() -> Decimal { Decimal::new(5, 4) }
fn default_http_timeout_secs() -> u64 { 20 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    /// Annualized fee assumed when a listing carries none
    #[serde(default = "default_fee_rate")]
    pub default_fee_rate: Decimal,
    /// Days of APY history fetched per pool when trend blending is on
    #[serde(default = "default_history_days")]
    pub history_days: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_base_url(),
            timeout_secs: default_http_timeout_secs(),
            default_fee_rate: default_fee_rate(),
            history_days: default_history_days(),
        }
    }
}

fn default_market_base_url() -> String { "https://yields.llama.fi".to_string() }
fn default_fee_rate() -> Decimal { Decimal::new(5, 4) }
fn default_history_days() -> i64 { 90 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            telegram_chat_id: None,
            telegram_api_url: default_telegram_api_url(),
        }
    }
}

fn default_telegram_api_url() -> String { "https://api.telegram.org".to_string() }

/// Untyped venue entry as written in config; resolved by the venue registry
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VenueSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_in_paper_mode() {
        let cfg = ControllerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.kill_switch.threshold, 3);
        assert_eq!(cfg.policy.min_delta, Decimal::new(1, 2));
    }

    #[test]
    fn test_live_mode_requires_endpoints() {
        let cfg = ControllerConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_reinvest_ratio_bounds() {
        let mut cfg = ControllerConfig::default();
        cfg.settlement.reinvest_ratio = Decimal::new(15, 1);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_short_interval_rejected() {
        let cfg = ControllerConfig {
            cycle_interval_secs: 60,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_venue_type_is_config_error() {
        let mut cfg = ControllerConfig::default();
        cfg.venues.insert(
            "base:mystery:usdc".to_string(),
            VenueSpec {
                kind: "mystery".to_string(),
                params: BTreeMap::new(),
            },
        );
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownVenueType { .. })
        ));
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("k", "0x60a3E35Cc302bFA44Cb288Bc5a4F316Fdb1adb42").is_ok());
        assert!(validate_address("k", "0x123").is_err());
        assert!(validate_address("k", "60a3E35Cc302bFA44Cb288Bc5a4F316Fdb1adb42").is_err());
    }

    #[test]
    fn test_periods_per_year_daily() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.periods_per_year(), Decimal::from(365));
        assert_eq!(cfg.interval_factor(), Decimal::ONE);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.yaml");
        std::fs::write(
            &path,
            "mode: paper\ncycle_interval_secs: 3600\npolicy:\n  min_delta: 0.05\nvenues:\n  base:paper:usdc:\n    type: paper\n",
        )
        .unwrap();
        let cfg = ControllerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.cycle_interval_secs, 3600);
        assert_eq!(cfg.policy.min_delta, Decimal::new(5, 2));
        assert_eq!(cfg.venues.len(), 1);
    }
}
