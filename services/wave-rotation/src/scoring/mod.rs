//! Score Engine
//!
//! Turns a pool listing into a cycle-local desirability score:
//! annualized yield -> per-cycle compounding rate -> fee/risk adjusted net
//! score -> optional staleness/TVL penalties -> optional trend blend.

pub mod trend;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::{decimal_from_f64, pow_frac};
use crate::config::{ControllerConfig, PenaltyConfig, TrendConfig};
use crate::market::PoolRecord;
pub use trend::{TrendExclusion, TrendMetrics};

/// Lowest annualized yield with a defined per-cycle rate
pub fn apy_floor() -> Decimal {
    Decimal::new(-99, 2)
}

/// A pool scored for the current cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub chain: String,
    pub pool_id: String,
    pub project: String,
    pub symbol: String,
    pub apy: Decimal,
    pub fee_rate: Decimal,
    pub risk_score: Decimal,
    pub tvl_usd: Decimal,
    /// Gross compounding rate per cycle
    pub rate_per_cycle: Decimal,
    /// Per-cycle rate after fees
    pub net_rate: Decimal,
    /// Net rate after staleness/TVL penalties
    pub net_score: Decimal,
    pub trend: Option<TrendMetrics>,
    /// Ranking score: the blended score when trend blending is on, else `net_score`
    pub score: Decimal,
}

/// `(1 + apy)^(1/periods) - 1`, or 0 when `apy <= -0.99`
pub fn per_cycle_rate(apy: Decimal, periods_per_year: Decimal) -> Decimal {
    if apy <= apy_floor() || periods_per_year <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let exponent = Decimal::ONE / periods_per_year;
    match pow_frac(Decimal::ONE + apy, exponent) {
        Some(grown) => grown - Decimal::ONE,
        None => Decimal::ZERO,
    }
}

/// Per-cycle rate discounted by the non-risk share of the per-cycle fee
pub fn net_score(rate: Decimal, fee_rate_per_cycle: Decimal, risk_score: Decimal) -> Decimal {
    let risk = risk_score.clamp(Decimal::ZERO, Decimal::ONE);
    let denominator = Decimal::ONE + fee_rate_per_cycle * (Decimal::ONE - risk);
    if denominator <= Decimal::ZERO {
        return rate;
    }
    rate / denominator
}

/// Daily penalty once a yield quote is older than `max_age_minutes`; capped at 50 bps
pub fn staleness_penalty(age_minutes: Option<Decimal>, max_age_minutes: Decimal) -> Decimal {
    let age = match age_minutes {
        Some(age) if age > Decimal::ZERO => age,
        _ => return Decimal::ZERO,
    };
    if age <= max_age_minutes {
        return Decimal::ZERO;
    }
    let over = age - max_age_minutes;
    let penalty = over / Decimal::from(1440) * Decimal::new(1, 3);
    penalty.min(Decimal::new(5, 3))
}

/// Daily penalty for TVL under the threshold; capped at 30 bps
pub fn tvl_penalty(tvl_usd: Decimal, threshold_usd: Decimal) -> Decimal {
    if threshold_usd <= Decimal::ZERO || tvl_usd >= threshold_usd {
        return Decimal::ZERO;
    }
    let cap = Decimal::new(3, 3);
    let gap = threshold_usd - tvl_usd.max(Decimal::ZERO);
    (gap / threshold_usd * cap).min(cap)
}

/// Candidates that survived scoring plus the ones dropped and why
#[derive(Debug, Clone, Default)]
pub struct ScoredSet {
    pub candidates: Vec<PoolCandidate>,
    pub excluded: Vec<(String, String)>,
}

/// Score engine bound to one cadence and penalty/trend configuration
#[derive(Debug, Clone)]
pub struct ScoreEngine {
    periods_per_year: Decimal,
    interval_factor: Decimal,
    penalties: PenaltyConfig,
    trend: TrendConfig,
}

impl ScoreEngine {
    pub fn new(
        periods_per_year: Decimal,
        interval_factor: Decimal,
        penalties: PenaltyConfig,
        trend: TrendConfig,
    ) -> Self {
        Self {
            periods_per_year,
            interval_factor,
            penalties,
            trend,
        }
    }

    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self::new(
            cfg.periods_per_year(),
            cfg.interval_factor(),
            cfg.scoring.penalties.clone(),
            cfg.scoring.trend.clone(),
        )
    }

    /// Per-cycle rate after fees, before penalties
    pub fn net_rate(&self, pool: &PoolRecord) -> Decimal {
        let rate = per_cycle_rate(pool.apy, self.periods_per_year);
        let fee_per_cycle = if self.periods_per_year > Decimal::ZERO {
            pool.fee_rate / self.periods_per_year
        } else {
            Decimal::ZERO
        };
        net_score(rate, fee_per_cycle, pool.risk_score)
    }

    /// Scalar desirability of one pool without trend blending
    pub fn score(&self, pool: &PoolRecord) -> Decimal {
        let net = self.net_rate(pool);
        if self.penalties.aggressive {
            return net;
        }
        let daily = staleness_penalty(pool.apy_age_minutes, self.penalties.max_apy_staleness_min)
            + tvl_penalty(pool.tvl_usd, self.penalties.tvl_penalty_usd);
        net - daily * self.interval_factor
    }

    /// Score every pool for this cycle
    ///
    /// With trend blending on, pools without a usable series are excluded
    /// rather than scored as zero.
    pub fn score_all(&self, pools: &[PoolRecord]) -> ScoredSet {
        let mut set = ScoredSet::default();

        for pool in pools {
            let trend = if self.trend.enabled {
                match trend::compute_trend(&pool.history, &self.trend) {
                    Ok(metrics) => Some(metrics),
                    Err(reason) => {
                        debug!("Excluding {}: {}", pool.pool_id, reason);
                        set.excluded.push((pool.pool_id.clone(), reason.to_string()));
                        continue;
                    }
                }
            } else {
                None
            };

            let net_score = self.score(pool);
            set.candidates.push(PoolCandidate {
                chain: pool.chain.clone(),
                pool_id: pool.pool_id.clone(),
                project: pool.project.clone(),
                symbol: pool.symbol.clone(),
                apy: pool.apy,
                fee_rate: pool.fee_rate,
                risk_score: pool.risk_score,
                tvl_usd: pool.tvl_usd,
                rate_per_cycle: per_cycle_rate(pool.apy, self.periods_per_year),
                net_rate: self.net_rate(pool),
                net_score,
                trend,
                score: net_score,
            });
        }

        if self.trend.enabled {
            self.apply_blend(&mut set.candidates);
        }
        set
    }

    fn apply_blend(&self, candidates: &mut [PoolCandidate]) {
        let max_positive = candidates
            .iter()
            .map(|c| c.net_score)
            .filter(|s| *s > Decimal::ZERO)
            .max();

        for candidate in candidates.iter_mut() {
            let Some(metrics) = candidate.trend else { continue };
            let yield_norm = match max_positive {
                Some(max) => decimal_to_f64(candidate.net_score / max),
                None => 0.0,
            };
            let blended = trend::blended_score(yield_norm, &metrics, &self.trend);
            candidate.score = decimal_from_f64(blended);
        }
    }
}

fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}
