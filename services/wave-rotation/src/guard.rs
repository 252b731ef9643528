//! Economic Guard
//!
//! Profitability check for an intended switch. Independent of the switch
//! policy: a move runs only when both agree. All arithmetic is decimal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::GuardConfig;

/// Outcome of the profitability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GuardDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EconomicGuard {
    enabled: bool,
    min_gain_base: Decimal,
    min_gain_fiat: Option<Decimal>,
    fiat_per_base: Decimal,
    safety_multiplier: Decimal,
    horizon_cycles: Decimal,
    gas_price_max_gwei: Option<Decimal>,
}

impl EconomicGuard {
    pub fn from_config(cfg: &GuardConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            min_gain_base: cfg.min_gain_base,
            min_gain_fiat: cfg.min_gain_fiat,
            fiat_per_base: cfg.fiat_per_base,
            safety_multiplier: cfg.safety_multiplier.max(Decimal::ONE),
            horizon_cycles: cfg.horizon_cycles,
            gas_price_max_gwei: cfg.gas_price_max_gwei,
        }
    }

    /// Guard that allows every move; the relaxed form some deployments run
    pub fn disabled() -> Self {
        Self::from_config(&GuardConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Reject when the live gas price is above the configured ceiling
    pub fn check_gas_ceiling(&self, gas_price_gwei: Option<Decimal>) -> GuardDecision {
        match (self.gas_price_max_gwei, gas_price_gwei) {
            (None, _) => GuardDecision::allow("gas:unchecked"),
            (Some(_), None) => GuardDecision::allow("gas:unchecked"),
            (Some(max), Some(live)) if live > max => {
                GuardDecision::reject(format!("gas>{}gwei({})", max.normalize(), live.round_dp(2).normalize()))
            }
            (Some(_), Some(live)) => GuardDecision::allow(format!("gas_ok:{}gwei", live.round_dp(2).normalize())),
        }
    }

    /// Is the expected gain from `score_current -> score_best` worth the execution cost?
    ///
    /// `estimated_cost_units * live_fee_rate` is the cost in base-asset units.
    pub fn should_move(
        &self,
        capital: Decimal,
        score_best: Decimal,
        score_current: Decimal,
        estimated_cost_units: Decimal,
        live_fee_rate: Decimal,
    ) -> GuardDecision {
        let delta = score_best - score_current;
        if delta <= Decimal::ZERO {
            return GuardDecision::reject(format!("edge:no_delta({})", delta.normalize()));
        }
        if !self.enabled {
            return GuardDecision::allow("edge_disabled");
        }

        let expected_gain = capital * delta * self.horizon_cycles;
        if expected_gain < self.min_gain_base {
            return GuardDecision::reject(format!(
                "edge:gain {} < min {}",
                expected_gain.round_dp(8).normalize(),
                self.min_gain_base.normalize()
            ));
        }
        if let Some(min_fiat) = self.min_gain_fiat {
            let gain_fiat = expected_gain * self.fiat_per_base;
            if gain_fiat < min_fiat {
                return GuardDecision::reject(format!(
                    "edge:gain_fiat {} < min {}",
                    gain_fiat.round_dp(4).normalize(),
                    min_fiat.normalize()
                ));
            }
        }

        let cost = estimated_cost_units * live_fee_rate;
        let cost_with_margin = cost * self.safety_multiplier;
        if expected_gain > cost_with_margin {
            GuardDecision::allow(format!(
                "edge_ok:gain {} > cost {}",
                expected_gain.round_dp(8).normalize(),
                cost_with_margin.round_dp(8).normalize()
            ))
        } else {
            GuardDecision::reject(format!(
                "edge:gain {} <= cost {}",
                expected_gain.round_dp(8).normalize(),
                cost_with_margin.round_dp(8).normalize()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn guard() -> EconomicGuard {
        EconomicGuard::from_config(&GuardConfig::default())
    }

    #[test]
    fn test_never_moves_without_positive_delta() {
        for g in [guard(), EconomicGuard::disabled()] {
            for (best, current) in [("0.01", "0.01"), ("0.005", "0.01"), ("-0.1", "0")] {
                let decision = g.should_move(d("1000"), d(best), d(current), Decimal::ZERO, Decimal::ZERO);
                assert!(!decision.allowed, "best {} current {}", best, current);
            }
        }
    }

    #[test]
    fn test_gain_must_exceed_cost() {
        // gain = 100 * 0.001 = 0.1; cost = 480000 * 0.0000001 = 0.048
        let ok = guard().should_move(d("100"), d("0.002"), d("0.001"), d("480000"), d("0.0000001"));
        assert!(ok.allowed, "{}", ok.reason);

        // cost = 480000 * 0.000001 = 0.48
        let too_costly = guard().should_move(d("100"), d("0.002"), d("0.001"), d("480000"), d("0.000001"));
        assert!(!too_costly.allowed);
    }

    #[test]
    fn test_equal_gain_and_cost_rejected() {
        let decision = guard().should_move(d("100"), d("0.002"), d("0.001"), d("1"), d("0.1"));
        assert!(!decision.allowed);
    }

    #[test]
    fn test_safety_multiplier_demands_margin() {
        let cfg = GuardConfig {
            safety_multiplier: d("3"),
            ..Default::default()
        };
        let strict = EconomicGuard::from_config(&cfg);
        // gain 0.1, raw cost 0.048, with margin 0.144
        let decision = strict.should_move(d("100"), d("0.002"), d("0.001"), d("480000"), d("0.0000001"));
        assert!(!decision.allowed);
    }

    #[test]
    fn test_min_gain_thresholds() {
        let cfg = GuardConfig {
            min_gain_base: d("0.5"),
            ..Default::default()
        };
        let decision = EconomicGuard::from_config(&cfg).should_move(d("100"), d("0.002"), d("0.001"), Decimal::ZERO, Decimal::ZERO);
        assert!(!decision.allowed);
        assert!(decision.reason.starts_with("edge:gain"));

        let cfg = GuardConfig {
            min_gain_fiat: Some(d("1000")),
            ..Default::default()
        };
        let decision = EconomicGuard::from_config(&cfg).should_move(d("100"), d("0.002"), d("0.001"), Decimal::ZERO, Decimal::ZERO);
        assert!(!decision.allowed);
        assert!(decision.reason.starts_with("edge:gain_fiat"));
    }

    #[test]
    fn test_disabled_guard_allows_positive_delta() {
        let decision = EconomicGuard::disabled().should_move(d("1"), d("0.002"), d("0.001"), d("1000000"), d("1"));
        assert!(decision.allowed);
        assert_eq!(decision.reason, "edge_disabled");
    }

    #[test]
    fn test_gas_ceiling() {
        let cfg = GuardConfig {
            gas_price_max_gwei: Some(d("5")),
            ..Default::default()
        };
        let g = EconomicGuard::from_config(&cfg);
        assert!(g.check_gas_ceiling(Some(d("1.2"))).allowed);
        let high = g.check_gas_ceiling(Some(d("7.5")));
        assert!(!high.allowed);
        assert_eq!(high.reason, "gas>5gwei(7.5)");
        assert_eq!(guard().check_gas_ceiling(Some(d("100"))).reason, "gas:unchecked");
    }
}
