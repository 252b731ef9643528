//! Bounded retry policy and failure classification

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::RpcError;

/// Coarse classification of an execution/RPC failure message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Nonce,
    Gas,
    Paused,
    Slippage,
    Liquidity,
    Revert,
    Timeout,
    Other,
}

impl FailureKind {
    /// Substring classification; more specific kinds are checked first
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if has(&["nonce too low", "nonce has already been used", "replacement transaction underpriced"]) {
            FailureKind::Nonce
        } else if has(&[
            "insufficient funds",
            "gas required exceeds",
            "intrinsic gas too low",
            "max fee per gas less than block base fee",
        ]) {
            FailureKind::Gas
        } else if has(&["paused", "shutdown", "emergency"]) {
            FailureKind::Paused
        } else if has(&["slippage", "price impact", "min amount", "insufficient output"]) {
            FailureKind::Slippage
        } else if has(&["liquidity"]) {
            FailureKind::Liquidity
        } else if has(&["revert"]) {
            FailureKind::Revert
        } else if has(&["timeout", "timed out"]) {
            FailureKind::Timeout
        } else {
            FailureKind::Other
        }
    }

    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Liquidity | FailureKind::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Nonce => "nonce",
            FailureKind::Gas => "gas",
            FailureKind::Paused => "paused",
            FailureKind::Slippage => "slippage",
            FailureKind::Liquidity => "liquidity",
            FailureKind::Revert => "revert",
            FailureKind::Timeout => "timeout",
            FailureKind::Other => "other",
        }
    }
}

/// Whether an RPC failure is worth another attempt on another endpoint
pub fn is_retryable(err: &RpcError) -> bool {
    match err {
        RpcError::Transport(_)
        | RpcError::Timeout(_)
        | RpcError::StaleBlock { .. }
        | RpcError::ChainMismatch { .. }
        | RpcError::InvalidResponse(_) => true,
        RpcError::Response { message, .. } => FailureKind::classify(message).is_retryable(),
    }
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_base: f64,
    /// Fraction of the delay added or removed at random
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_base: cfg.backoff_base,
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }

    /// Same attempt budget, never sleeps
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.max(1.0).powi(attempt as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retry number `attempt`, with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0))
    }
}
