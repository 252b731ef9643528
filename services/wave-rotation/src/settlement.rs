//! Settlement Engine
//!
//! Splits a cycle's realized profit between reinvested capital and the
//! treasury, and runs the crisis/autopause state machine driven by the
//! working pool's realized rate.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::amount::quantize;
use crate::config::{AutopauseConfig, ControllerConfig, SettlementConfig};
use crate::state::ControllerState;

/// Result of splitting one cycle's profit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub profit: Decimal,
    pub reinvest_ratio: Decimal,
    pub reinvested: Decimal,
    pub new_capital: Decimal,
    pub treasury_delta: Decimal,
}

/// Reinvestment ratio actually applied to `profit`
///
/// Losses and payouts worth less than `min_payout_fiat` are fully
/// reinvested; the split is deferred to a later, larger cycle.
pub fn effective_reinvest_ratio(
    profit: Decimal,
    base_ratio: Decimal,
    fx_fiat_per_base: Decimal,
    min_payout_fiat: Decimal,
) -> Decimal {
    if profit <= Decimal::ZERO {
        return Decimal::ONE;
    }
    let base_ratio = base_ratio.clamp(Decimal::ZERO, Decimal::ONE);
    let payout_fiat = profit * (Decimal::ONE - base_ratio) * fx_fiat_per_base;
    if payout_fiat < min_payout_fiat {
        Decimal::ONE
    } else {
        base_ratio
    }
}

/// Split `capital * rate` with a fixed reinvestment ratio
pub fn settle(capital: Decimal, rate: Decimal, reinvest_ratio: Decimal) -> Settlement {
    let profit = capital * rate;
    let ratio = if profit <= Decimal::ZERO {
        Decimal::ONE
    } else {
        reinvest_ratio.clamp(Decimal::ZERO, Decimal::ONE)
    };
    let reinvested = profit * ratio;
    let new_capital = (capital + reinvested).max(Decimal::ZERO);
    let treasury_delta = if profit > Decimal::ZERO {
        profit - reinvested
    } else {
        Decimal::ZERO
    };

    Settlement {
        profit,
        reinvest_ratio: ratio,
        reinvested,
        new_capital,
        treasury_delta,
    }
}

/// Status line for the settlement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "paused-eval")]
    PausedEval,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "settled")]
    Settled,
    #[serde(rename = "no-data")]
    NoData,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Stopped => "stopped",
            SettlementStatus::PausedEval => "paused-eval",
            SettlementStatus::Idle => "idle",
            SettlementStatus::Settled => "settled",
            SettlementStatus::NoData => "no-data",
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the crisis monitor did this cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisReport {
    pub in_crisis: bool,
    pub streak: u32,
    pub paused_now: bool,
    pub resumed: bool,
    /// `resume:fast_signal`, `resume:ready_by_time`, `resume:cooldown` or `resume:wait`
    pub resume_note: Option<String>,
}

/// Everything the settlement step produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSettlement {
    pub status: SettlementStatus,
    pub crisis: CrisisReport,
    /// Present only when status is `settled`
    pub settlement: Option<Settlement>,
    pub stop_loss_threshold: Decimal,
}

impl CycleSettlement {
    pub fn treasury_delta(&self) -> Decimal {
        self.settlement
            .as_ref()
            .map(|s| s.treasury_delta)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    settlement: SettlementConfig,
    autopause: AutopauseConfig,
    interval_factor: Decimal,
}

impl SettlementEngine {
    pub fn new(settlement: SettlementConfig, autopause: AutopauseConfig, interval_factor: Decimal) -> Self {
        Self {
            settlement,
            autopause,
            interval_factor,
        }
    }

    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self::new(cfg.settlement.clone(), cfg.autopause.clone(), cfg.interval_factor())
    }

    /// Per-cycle stop-loss, the daily threshold scaled to the cycle length
    pub fn stop_loss_threshold(&self) -> Decimal {
        self.settlement.stop_loss_daily * self.interval_factor
    }

    /// Split profit with the effective ratio, rounded to the configured precision
    pub fn settle(&self, capital: Decimal, rate: Decimal) -> Settlement {
        let places = self.settlement.decimal_places;
        let profit = quantize(capital * rate, places);
        let ratio = effective_reinvest_ratio(
            profit,
            self.settlement.reinvest_ratio,
            self.settlement.fx_fiat_per_base,
            self.settlement.min_payout_fiat,
        );
        let mut result = settle(capital, rate, ratio);
        result.profit = profit;
        result.reinvested = quantize(result.reinvested, places);
        result.new_capital = quantize(result.new_capital, places).max(Decimal::ZERO);
        result.treasury_delta = if profit > Decimal::ZERO {
            (profit - result.reinvested).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        result
    }

    /// Update the crisis streak and pause/resume flags on `state`
    pub fn update_crisis(&self, state: &mut ControllerState, rate: Decimal, now: DateTime<Utc>) -> CrisisReport {
        let threshold = self.stop_loss_threshold();
        let in_crisis = rate < threshold;

        if in_crisis {
            state.crisis_streak += 1;
            state.last_crisis_at = Some(now);
            warn!(
                "Crisis: rate {} < stop-loss {} (streak {})",
                rate.round_dp(8).normalize(),
                threshold.normalize(),
                state.crisis_streak
            );
        } else {
            state.crisis_streak = 0;
        }

        let mut report = CrisisReport {
            in_crisis,
            ..Default::default()
        };

        if in_crisis && !state.paused && state.crisis_streak >= self.autopause.streak.max(1) {
            state.paused = true;
            state.last_resume_attempt_at = None;
            report.paused_now = true;
            warn!("Autopause engaged after {} crisis cycles", state.crisis_streak);
        }

        if state.paused && !in_crisis && !report.paused_now {
            let note = self.try_resume(state, rate, now);
            report.resumed = !state.paused;
            report.resume_note = Some(note);
        }

        report.streak = state.crisis_streak;
        report
    }

    fn try_resume(&self, state: &mut ControllerState, rate: Decimal, now: DateTime<Utc>) -> String {
        let cooldown = Duration::minutes(self.autopause.resume_cooldown_minutes.max(0));
        let cooldown_ok = state
            .last_resume_attempt_at
            .map(|at| now - at >= cooldown)
            .unwrap_or(true);

        let fast_signal = rate >= self.autopause.fast_signal_min;
        let wait = Duration::minutes(self.autopause.resume_wait_minutes.max(0));
        let ready_by_time = wait == Duration::zero()
            || state.last_crisis_at.map(|at| now - at >= wait).unwrap_or(false);

        if !cooldown_ok {
            let note = if fast_signal { "resume:cooldown" } else { "resume:wait" };
            return note.to_string();
        }

        let note = if fast_signal {
            "resume:fast_signal"
        } else if ready_by_time {
            "resume:ready_by_time"
        } else {
            return "resume:wait".to_string();
        };

        // Only a real attempt starts the cooldown
        state.last_resume_attempt_at = Some(now);
        state.resume();
        info!("Autopause cleared ({})", note);
        note.to_string()
    }

    /// Close the cycle: crisis bookkeeping, then the split when allowed
    ///
    /// `rate` is the working pool's net per-cycle rate, `None` when idle or
    /// when the held pool has no reading this cycle. Without a reading the
    /// crisis streak and pause flag are left untouched.
    pub fn close_cycle(
        &self,
        state: &mut ControllerState,
        capital: Decimal,
        rate: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> CycleSettlement {
        let (status, crisis, settlement) = match rate {
            None => {
                let status = if state.is_deployed() {
                    SettlementStatus::NoData
                } else if state.paused {
                    SettlementStatus::PausedEval
                } else {
                    SettlementStatus::Idle
                };
                let crisis = CrisisReport {
                    streak: state.crisis_streak,
                    ..Default::default()
                };
                (status, crisis, None)
            }
            Some(rate) => {
                let crisis = self.update_crisis(state, rate, now);
                if crisis.in_crisis {
                    (SettlementStatus::Stopped, crisis, None)
                } else if state.paused {
                    (SettlementStatus::PausedEval, crisis, None)
                } else {
                    (SettlementStatus::Settled, crisis, Some(self.settle(capital, rate)))
                }
            }
        };

        match &settlement {
            Some(s) => info!(
                "Settlement: profit {} reinvested {} treasury {} capital {}",
                s.profit.normalize(),
                s.reinvested.normalize(),
                s.treasury_delta.normalize(),
                s.new_capital.normalize()
            ),
            None => info!("Settlement: {}", status),
        }

        CycleSettlement {
            status,
            crisis,
            settlement,
            stop_loss_threshold: self.stop_loss_threshold(),
        }
    }
}
