//! Kill Switch
//!
//! Sticky halt after N consecutive execution failures. The streak resets
//! on success or after an idle timeout; once triggered, only a manual
//! reset clears it. Every mutation is persisted immediately.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::KillSwitchConfig;
use crate::error::{KillSwitchError, StoreError};
use crate::state::KillSwitchState;
use crate::store::JsonStore;

/// Snapshot for status output
#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub triggered: bool,
    pub consecutive_errors: u32,
    pub threshold: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub triggered_at: Option<DateTime<Utc>>,
}

pub struct KillSwitch {
    threshold: u32,
    reset_timeout: Duration,
    store: JsonStore<KillSwitchState>,
    state: KillSwitchState,
}

impl KillSwitch {
    /// Load persisted state; a threshold below 1 is raised to 1
    pub fn load(store: JsonStore<KillSwitchState>, cfg: &KillSwitchConfig) -> Result<Self, StoreError> {
        let state = store.load()?;
        Ok(Self {
            threshold: cfg.threshold.max(1),
            reset_timeout: Duration::seconds(cfg.reset_timeout_secs),
            store,
            state,
        })
    }

    pub fn state(&self) -> &KillSwitchState {
        &self.state
    }

    pub fn is_triggered(&self) -> bool {
        self.state.triggered
    }

    /// Refuse to proceed while triggered
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), KillSwitchError> {
        if !self.state.triggered {
            return Ok(());
        }
        let age_secs = self
            .state
            .last_error_at
            .map(|at| (now - at).num_seconds())
            .unwrap_or(0);
        Err(KillSwitchError::Tripped {
            consecutive_errors: self.state.consecutive_errors,
            last_error: self.state.last_error.clone().unwrap_or_else(|| "unknown".to_string()),
            age_secs,
        })
    }

    /// Count a failure; returns true when this error triggered the switch
    pub fn record_error(&mut self, message: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if let Some(last) = self.state.last_error_at {
            if now - last > self.reset_timeout && self.state.consecutive_errors > 0 {
                info!(
                    "Kill switch streak reset after {}s idle",
                    (now - last).num_seconds()
                );
                self.state.consecutive_errors = 0;
            }
        }

        self.state.consecutive_errors += 1;
        self.state.last_error_at = Some(now);
        self.state.last_error = Some(message.to_string());

        let mut tripped_now = false;
        if !self.state.triggered && self.state.consecutive_errors >= self.threshold {
            self.state.triggered = true;
            self.state.triggered_at = Some(now);
            tripped_now = true;
            error!(
                "Kill switch TRIGGERED after {} consecutive errors: {}",
                self.state.consecutive_errors, message
            );
        } else {
            warn!(
                "Kill switch error {}/{}: {}",
                self.state.consecutive_errors, self.threshold, message
            );
        }

        self.store.save(&self.state)?;
        Ok(tripped_now)
    }

    /// Clear the streak; does not clear a triggered switch
    pub fn record_success(&mut self) -> Result<(), StoreError> {
        if self.state.consecutive_errors == 0 && self.state.last_error.is_none() {
            return Ok(());
        }
        self.state.consecutive_errors = 0;
        self.state.last_error = None;
        self.state.last_error_at = None;
        self.store.save(&self.state)
    }

    /// Manual operator reset
    pub fn reset(&mut self) -> Result<(), StoreError> {
        info!("Kill switch manually reset");
        self.state = KillSwitchState::default();
        self.store.save(&self.state)
    }

    pub fn status(&self) -> KillSwitchStatus {
        KillSwitchStatus {
            triggered: self.state.triggered,
            consecutive_errors: self.state.consecutive_errors,
            threshold: self.threshold,
            last_error: self.state.last_error.clone(),
            last_error_at: self.state.last_error_at,
            triggered_at: self.state.triggered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn kill_switch(dir: &std::path::Path, threshold: u32) -> KillSwitch {
        KillSwitch::load(
            JsonStore::new(dir.join("kill_switch.json")),
            &KillSwitchConfig {
                threshold,
                reset_timeout_secs: 3600,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_triggers_exactly_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        for threshold in 1..=5 {
            let mut ks = kill_switch(dir.path(), threshold);
            ks.reset().unwrap();
            for i in 1..threshold {
                assert!(!ks.record_error("boom", now()).unwrap());
                assert!(ks.check(now()).is_ok(), "threshold {} error {}", threshold, i);
            }
            assert!(ks.record_error("boom", now()).unwrap());
            assert!(ks.check(now()).is_err());
        }
    }

    #[test]
    fn test_trigger_is_sticky_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = kill_switch(dir.path(), 2);
        ks.record_error("a", now()).unwrap();
        ks.record_error("b", now()).unwrap();
        ks.record_success().unwrap();
        assert!(ks.check(now() + Duration::days(30)).is_err());

        ks.reset().unwrap();
        assert!(ks.check(now()).is_ok());
        assert_eq!(ks.state().consecutive_errors, 0);
    }

    #[test]
    fn test_success_resets_streak() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = kill_switch(dir.path(), 3);
        ks.record_error("a", now()).unwrap();
        ks.record_error("b", now()).unwrap();
        ks.record_success().unwrap();
        ks.record_error("c", now()).unwrap();
        ks.record_error("d", now()).unwrap();
        assert!(ks.check(now()).is_ok());
        assert_eq!(ks.state().consecutive_errors, 2);
    }

    #[test]
    fn test_idle_timeout_resets_streak() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = kill_switch(dir.path(), 3);
        ks.record_error("a", now()).unwrap();
        ks.record_error("b", now()).unwrap();
        ks.record_error("c", now() + Duration::seconds(3601)).unwrap();
        assert!(!ks.is_triggered());
        assert_eq!(ks.state().consecutive_errors, 1);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ks = kill_switch(dir.path(), 1);
            ks.record_error("deposit: execution reverted", now()).unwrap();
        }
        let ks = kill_switch(dir.path(), 1);
        let err = ks.check(now() + Duration::seconds(30)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("execution reverted"));
        assert!(msg.contains("30s ago"));
    }

    #[test]
    fn test_zero_threshold_treated_as_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = kill_switch(dir.path(), 0);
        assert!(ks.record_error("a", now()).unwrap());
        assert_eq!(ks.status().threshold, 1);
    }
}
