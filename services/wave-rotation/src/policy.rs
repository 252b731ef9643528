//! Switch Policy
//!
//! Behavioural hysteresis: a switch needs a multiplicative improvement over
//! the held position's score, and optionally a minimum dwell time since the
//! last switch.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::scoring::PoolCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    NoCandidate,
    AlreadyHeld,
    OpenPosition,
    NoPositiveScore,
    ReplaceNonPositive,
    BelowThreshold,
    Cooldown,
    Improvement,
}

impl SwitchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchReason::NoCandidate => "no_candidate",
            SwitchReason::AlreadyHeld => "already_held",
            SwitchReason::OpenPosition => "open_position",
            SwitchReason::NoPositiveScore => "no_positive_score",
            SwitchReason::ReplaceNonPositive => "replace_non_positive",
            SwitchReason::BelowThreshold => "below_threshold",
            SwitchReason::Cooldown => "cooldown",
            SwitchReason::Improvement => "improvement",
        }
    }
}

/// Intent to switch, with the rule that decided it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchDecision {
    pub switch: bool,
    pub reason: SwitchReason,
}

impl SwitchDecision {
    fn yes(reason: SwitchReason) -> Self {
        Self { switch: true, reason }
    }

    fn no(reason: SwitchReason) -> Self {
        Self { switch: false, reason }
    }
}

/// Hysteresis and cooldown parameters
#[derive(Debug, Clone)]
pub struct SwitchPolicy {
    pub min_delta: Decimal,
    pub cooldown: Option<Duration>,
}

impl SwitchPolicy {
    pub fn new(min_delta: Decimal, cooldown: Option<Duration>) -> Self {
        Self { min_delta, cooldown }
    }

    pub fn from_config(cfg: &PolicyConfig) -> Self {
        let cooldown = (cfg.cooldown_secs > 0).then(|| Duration::seconds(cfg.cooldown_secs as i64));
        Self::new(cfg.min_delta, cooldown)
    }

    pub fn evaluate(
        &self,
        best: Option<&PoolCandidate>,
        current: Option<&PoolCandidate>,
        last_switch_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SwitchDecision {
        evaluate_switch(
            best.map(|b| b.score),
            current.map(|c| c.score),
            best.zip(current).map(|(b, c)| b.pool_id == c.pool_id).unwrap_or(false),
            self.min_delta,
            self.cooldown,
            last_switch_at,
            now,
        )
    }
}

/// Rules in order: no current, non-positive current, relative threshold;
/// any resulting switch is then held back by the cooldown window
pub fn evaluate_switch(
    best: Option<Decimal>,
    current: Option<Decimal>,
    same_pool: bool,
    min_delta: Decimal,
    cooldown: Option<Duration>,
    last_switch_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SwitchDecision {
    let decision = score_rule(best, current, same_pool, min_delta);
    if !decision.switch {
        return decision;
    }

    if let (Some(cooldown), Some(last)) = (cooldown, last_switch_at) {
        if now - last < cooldown {
            return SwitchDecision::no(SwitchReason::Cooldown);
        }
    }

    decision
}

fn score_rule(
    best: Option<Decimal>,
    current: Option<Decimal>,
    same_pool: bool,
    min_delta: Decimal,
) -> SwitchDecision {
    let Some(best) = best else {
        return SwitchDecision::no(SwitchReason::NoCandidate);
    };

    let Some(current) = current else {
        return if best > Decimal::ZERO {
            SwitchDecision::yes(SwitchReason::OpenPosition)
        } else {
            SwitchDecision::no(SwitchReason::NoPositiveScore)
        };
    };

    if same_pool {
        return SwitchDecision::no(SwitchReason::AlreadyHeld);
    }

    if current <= Decimal::ZERO {
        return if best > Decimal::ZERO {
            SwitchDecision::yes(SwitchReason::ReplaceNonPositive)
        } else {
            SwitchDecision::no(SwitchReason::NoPositiveScore)
        };
    }

    let min_delta = min_delta.max(Decimal::ZERO);
    if best < current * (Decimal::ONE + min_delta) {
        return SwitchDecision::no(SwitchReason::BelowThreshold);
    }

    SwitchDecision::yes(SwitchReason::Improvement)
}

/// Boolean form of [`evaluate_switch`] over raw scores
pub fn should_switch(
    best: Option<Decimal>,
    current: Option<Decimal>,
    min_delta: Decimal,
    cooldown: Option<Duration>,
    last_switch_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    evaluate_switch(best, current, false, min_delta, cooldown, last_switch_at, now).switch
}
