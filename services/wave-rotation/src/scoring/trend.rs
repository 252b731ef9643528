//! Trend metrics over a price/NAV series
//!
//! Momentum is the OLS slope of log-price against observation index,
//! divided by the sample volatility of trailing log returns.

use serde::{Deserialize, Serialize};

use crate::config::{BlendWeights, TrendConfig};
use crate::market::PricePoint;
use rust_decimal::prelude::ToPrimitive;

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    /// Log-price slope per observation
    pub slope: f64,
    /// Stddev of trailing log returns
    pub volatility: f64,
    /// Largest peak-to-trough loss as a fraction of the peak
    pub max_drawdown: f64,
    /// Slope / volatility, clipped to +/- z_clip
    pub momentum_z: f64,
    pub observations: usize,
}

/// Why a series cannot produce trend metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrendExclusion {
    TooFewObservations { have: usize, need: usize },
    NonPositivePrice,
}

impl std::fmt::Display for TrendExclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendExclusion::TooFewObservations { have, need } => {
                write!(f, "trend:observations {}<{}", have, need)
            }
            TrendExclusion::NonPositivePrice => write!(f, "trend:non_positive_price"),
        }
    }
}

/// Compute trend metrics; a pool whose series fails here is dropped from the cycle
pub fn compute_trend(series: &[PricePoint], cfg: &TrendConfig) -> Result<TrendMetrics, TrendExclusion> {
    if series.len() < cfg.min_observations {
        return Err(TrendExclusion::TooFewObservations {
            have: series.len(),
            need: cfg.min_observations,
        });
    }

    let mut ordered: Vec<&PricePoint> = series.iter().collect();
    ordered.sort_by_key(|p| p.timestamp);

    let mut prices = Vec::with_capacity(ordered.len());
    for point in ordered {
        match point.price.to_f64() {
            Some(p) if p > 0.0 && p.is_finite() => prices.push(p),
            _ => return Err(TrendExclusion::NonPositivePrice),
        }
    }

    let logs: Vec<f64> = prices.iter().map(|p| p.ln()).collect();
    let slope = ols_slope(&logs);

    let returns: Vec<f64> = logs.windows(2).map(|w| w[1] - w[0]).collect();
    let window = cfg.volatility_window.max(2).min(returns.len());
    let trailing = &returns[returns.len() - window..];
    let volatility = sample_stddev(trailing);

    let clip = cfg.z_clip.abs().max(EPS);
    let raw_z = if volatility > EPS {
        slope / volatility
    } else if slope > EPS {
        clip
    } else if slope < -EPS {
        -clip
    } else {
        0.0
    };

    Ok(TrendMetrics {
        slope,
        volatility,
        max_drawdown: max_drawdown(&prices),
        momentum_z: raw_z.clamp(-clip, clip),
        observations: prices.len(),
    })
}

/// Least-squares slope of `ys` against 0..n
pub fn ols_slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n_f;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den.abs() < EPS {
        0.0
    } else {
        num / den
    }
}

fn sample_stddev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Largest drawdown from a running peak, in [0, 1]
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &p in prices {
        if p > peak {
            peak = p;
        }
        if peak > 0.0 {
            worst = worst.max(1.0 - p / peak);
        }
    }
    worst
}

/// Weights rescaled to sum to 1; all-zero weights fall back to pure yield
pub fn normalized_weights(weights: &BlendWeights) -> BlendWeights {
    let parts = [
        weights.yield_weight.max(0.0),
        weights.trend.max(0.0),
        weights.volatility.max(0.0),
        weights.drawdown.max(0.0),
    ];
    let total: f64 = parts.iter().sum();
    if total <= EPS {
        return BlendWeights {
            yield_weight: 1.0,
            trend: 0.0,
            volatility: 0.0,
            drawdown: 0.0,
        };
    }
    BlendWeights {
        yield_weight: parts[0] / total,
        trend: parts[1] / total,
        volatility: parts[2] / total,
        drawdown: parts[3] / total,
    }
}

/// Composite of normalized yield, momentum and risk penalties
pub fn blended_score(yield_norm: f64, metrics: &TrendMetrics, cfg: &TrendConfig) -> f64 {
    let w = normalized_weights(&cfg.weights);
    let clip = cfg.z_clip.abs().max(EPS);
    let trend_term = metrics.momentum_z.clamp(-clip, clip) / clip;
    let vol_term = if cfg.volatility_cap > EPS {
        (metrics.volatility / cfg.volatility_cap).min(1.0)
    } else {
        0.0
    };
    let dd_term = if cfg.drawdown_cap > EPS {
        (metrics.max_drawdown / cfg.drawdown_cap).min(1.0)
    } else {
        0.0
    };
    w.yield_weight * yield_norm + w.trend * trend_term - w.volatility * vol_term - w.drawdown * dd_term
}
