//! Persisted controller records
//!
//! Four flat JSON documents under the state directory:
//! `state/controller.json`, `state/ledger.json`, `state/kill_switch.json`
//! and the transient `state/run.lock`. Cycle summaries go to
//! `journal/cycles.jsonl`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::{JsonStore, Journal};

/// Controller memory carried between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub active_pool_id: Option<String>,
    pub active_chain: Option<String>,
    pub active_score: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
    pub crisis_streak: u32,
    pub paused: bool,
    pub last_crisis_at: Option<DateTime<Utc>>,
    pub last_resume_attempt_at: Option<DateTime<Utc>>,
    pub day_anchor: Option<NaiveDate>,
    pub capital_start_day: Decimal,
    pub treasury_start_day: Decimal,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub last_capital_move_at: Option<DateTime<Utc>>,
}

impl ControllerState {
    /// Capital is parked in a venue
    pub fn is_deployed(&self) -> bool {
        self.active_pool_id.is_some()
    }

    /// Re-anchor day-start values on the first cycle of a new UTC day
    ///
    /// Returns true when a new anchor was written.
    pub fn roll_day(&mut self, today: NaiveDate, ledger: &CapitalLedger) -> bool {
        if self.day_anchor == Some(today) {
            return false;
        }
        self.day_anchor = Some(today);
        self.capital_start_day = ledger.capital;
        self.treasury_start_day = ledger.treasury_total;
        true
    }

    /// Explicit operator/auto resume out of an autopause
    pub fn resume(&mut self) {
        self.paused = false;
        self.crisis_streak = 0;
    }
}

/// Capital and treasury balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalLedger {
    pub capital: Decimal,
    pub treasury_total: Decimal,
    /// Treasury share booked but not yet swapped out
    #[serde(default)]
    pub treasury_pending: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for CapitalLedger {
    fn default() -> Self {
        Self::with_capital(Decimal::ZERO)
    }
}

impl CapitalLedger {
    pub fn with_capital(capital: Decimal) -> Self {
        Self {
            capital,
            treasury_total: Decimal::ZERO,
            treasury_pending: Decimal::ZERO,
            updated_at: None,
        }
    }
}

/// Consecutive-failure tracker behind the kill switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub consecutive_errors: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Contents of the run lock file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLockRecord {
    pub holder_pid: u32,
    pub acquired_at: Option<DateTime<Utc>>,
}

/// Locations of every persisted record
#[derive(Debug, Clone)]
pub struct StateFiles {
    root: PathBuf,
    pub controller: JsonStore<ControllerState>,
    pub ledger: JsonStore<CapitalLedger>,
    pub kill_switch: JsonStore<KillSwitchState>,
    pub journal: Journal,
}

impl StateFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join("state");
        Self {
            controller: JsonStore::new(state_dir.join("controller.json")),
            ledger: JsonStore::new(state_dir.join("ledger.json")),
            kill_switch: JsonStore::new(state_dir.join("kill_switch.json")),
            journal: Journal::new(root.join("journal").join("cycles.jsonl")),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("state").join("run.lock")
    }

    /// Ledger, seeded with the initial capital on first run
    pub fn load_ledger(&self, initial_capital: Decimal) -> Result<CapitalLedger, crate::error::StoreError> {
        Ok(self
            .ledger
            .load_opt()?
            .unwrap_or_else(|| CapitalLedger::with_capital(initial_capital)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, 0, 0).unwrap()
    }

    #[test]
    fn test_controller_state_persists_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());
        let state = ControllerState {
            active_pool_id: Some("base:aave-v3:usdc".to_string()),
            active_chain: Some("base".to_string()),
            active_score: Decimal::from_str("0.000123456789").unwrap(),
            updated_at: Some(ts(1)),
            crisis_streak: 2,
            paused: true,
            last_crisis_at: Some(ts(2)),
            last_resume_attempt_at: Some(ts(3)),
            day_anchor: Some(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()),
            capital_start_day: Decimal::from_str("100.5").unwrap(),
            treasury_start_day: Decimal::from_str("1.25").unwrap(),
            last_switch_at: Some(ts(4)),
            last_capital_move_at: Some(ts(5)),
        };
        files.controller.save(&state).unwrap();
        assert_eq!(files.controller.load().unwrap(), state);
    }

    #[test]
    fn test_ledger_persists_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());
        let ledger = CapitalLedger {
            capital: Decimal::from_str("102.500000000000000001").unwrap(),
            treasury_total: Decimal::from_str("2.5").unwrap(),
            treasury_pending: Decimal::from_str("0.0001").unwrap(),
            updated_at: Some(ts(6)),
        };
        files.ledger.save(&ledger).unwrap();
        assert_eq!(files.ledger.load().unwrap(), ledger);
    }

    #[test]
    fn test_kill_switch_state_persists_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());
        let state = KillSwitchState {
            consecutive_errors: 3,
            last_error_at: Some(ts(7)),
            last_error: Some("deposit: execution reverted".to_string()),
            triggered: true,
            triggered_at: Some(ts(7)),
        };
        files.kill_switch.save(&state).unwrap();
        assert_eq!(files.kill_switch.load().unwrap(), state);
    }

    #[test]
    fn test_run_lock_record_persists_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<RunLockRecord> = JsonStore::new(dir.path().join("run.lock"));
        let record = RunLockRecord {
            holder_pid: 4242,
            acquired_at: Some(ts(8)),
        };
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), record);
    }

    #[test]
    fn test_ledger_seeded_with_initial_capital() {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::new(dir.path());
        let ledger = files.load_ledger(Decimal::from(100)).unwrap();
        assert_eq!(ledger.capital, Decimal::from(100));
        assert_eq!(ledger.treasury_total, Decimal::ZERO);
    }

    #[test]
    fn test_roll_day_anchors_once_per_day() {
        let mut state = ControllerState::default();
        let ledger = CapitalLedger::with_capital(Decimal::from(100));
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert!(state.roll_day(day, &ledger));
        assert!(!state.roll_day(day, &CapitalLedger::with_capital(Decimal::from(200))));
        assert_eq!(state.capital_start_day, Decimal::from(100));
    }
}
