//! Per-cycle summary
//!
//! One summary per cycle, always carrying the four status lines (pool
//! decision, guard decision, execution, settlement). Rendered as text for
//! notifications and appended as JSON to the cycle journal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use uuid::Uuid;

use crate::config::ExecutionMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: ExecutionMode,

    pub pool_decision: String,
    pub guard_decision: String,
    pub execution: String,
    pub settlement: String,

    pub active_pool: Option<String>,
    pub target_pool: Option<String>,
    pub best_score: Option<Decimal>,
    pub current_score: Option<Decimal>,
    pub candidates: usize,

    pub capital_before: Decimal,
    pub capital_after: Decimal,
    pub treasury_delta: Decimal,
    pub treasury_pending: Decimal,
    pub treasury_total: Decimal,
    pub pnl_day: Decimal,
    pub roi_day: Decimal,
    pub pnl_total: Decimal,
    pub roi_total: Decimal,

    pub tags: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CycleSummary {
    /// Blank summary; every status line starts as `skipped`
    pub fn new(mode: ExecutionMode, timestamp: DateTime<Utc>, capital: Decimal) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp,
            mode,
            pool_decision: "skipped".to_string(),
            guard_decision: "skipped".to_string(),
            execution: "skipped".to_string(),
            settlement: "skipped".to_string(),
            active_pool: None,
            target_pool: None,
            best_score: None,
            current_score: None,
            candidates: 0,
            capital_before: capital,
            capital_after: capital,
            treasury_delta: Decimal::ZERO,
            treasury_pending: Decimal::ZERO,
            treasury_total: Decimal::ZERO,
            pnl_day: Decimal::ZERO,
            roi_day: Decimal::ZERO,
            pnl_total: Decimal::ZERO,
            roi_total: Decimal::ZERO,
            tags: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// PnL and ROI against the day anchor and the initial capital
    pub fn set_returns(&mut self, day_start: Decimal, initial: Decimal) {
        self.pnl_day = self.capital_after - day_start;
        self.roi_day = ratio(self.pnl_day, day_start);
        self.pnl_total = self.capital_after + self.treasury_total + self.treasury_pending - initial;
        self.roi_total = ratio(self.pnl_total, initial);
    }

    /// Plain-text rendering for notifications
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "wave-rotation [{}] {}",
            self.mode,
            self.timestamp.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(out, "pool: {}", self.pool_decision);
        let _ = writeln!(out, "guard: {}", self.guard_decision);
        let _ = writeln!(out, "exec: {}", self.execution);
        let _ = writeln!(out, "settle: {}", self.settlement);
        let _ = writeln!(
            out,
            "position: {} -> {}",
            self.active_pool.as_deref().unwrap_or("-"),
            self.target_pool.as_deref().unwrap_or("-")
        );
        if let (Some(best), Some(current)) = (self.best_score, self.current_score) {
            let _ = writeln!(out, "score: best {} / current {}", fmt_dec(best, 8), fmt_dec(current, 8));
        } else if let Some(best) = self.best_score {
            let _ = writeln!(out, "score: best {}", fmt_dec(best, 8));
        }
        let _ = writeln!(
            out,
            "capital: {} -> {}",
            fmt_dec(self.capital_before, 6),
            fmt_dec(self.capital_after, 6)
        );
        let _ = writeln!(
            out,
            "treasury: +{} (pending {}, total {})",
            fmt_dec(self.treasury_delta, 6),
            fmt_dec(self.treasury_pending, 6),
            fmt_dec(self.treasury_total, 6)
        );
        let _ = writeln!(
            out,
            "roi: day {}% total {}%",
            fmt_dec(self.roi_day * Decimal::ONE_HUNDRED, 3),
            fmt_dec(self.roi_total * Decimal::ONE_HUNDRED, 3)
        );
        if !self.tags.is_empty() {
            let _ = writeln!(out, "tags: {}", self.tags.join(", "));
        }
        for e in &self.errors {
            let _ = writeln!(out, "ERROR: {}", e);
        }
        for w in &self.warnings {
            let _ = writeln!(out, "warn: {}", w);
        }
        out.trim_end().to_string()
    }
}

fn ratio(num: Decimal, den: Decimal) -> Decimal {
    if den.is_zero() {
        Decimal::ZERO
    } else {
        num / den
    }
}

fn fmt_dec(value: Decimal, places: u32) -> String {
    value.round_dp(places).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn summary() -> CycleSummary {
        let ts = Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap();
        CycleSummary::new(ExecutionMode::Paper, ts, Decimal::from(100))
    }

    #[test]
    fn test_text_has_four_status_lines() {
        let mut s = summary();
        s.pool_decision = "hold:below_threshold".to_string();
        s.error("deposit: error");
        let text = s.format_text();
        for prefix in ["pool: ", "guard: ", "exec: ", "settle: "] {
            assert!(text.lines().any(|l| l.starts_with(prefix)), "missing {}", prefix);
        }
        assert!(text.contains("ERROR: deposit: error"));
        assert!(text.starts_with("wave-rotation [paper] 2026-06-01 09:30 UTC"));
    }

    #[test]
    fn test_returns_against_anchor_and_initial() {
        let mut s = summary();
        s.capital_after = Decimal::from_str("102.5").unwrap();
        s.treasury_total = Decimal::from_str("2.5").unwrap();
        s.set_returns(Decimal::from(100), Decimal::from(100));
        assert_eq!(s.pnl_day, Decimal::from_str("2.5").unwrap());
        assert_eq!(s.roi_day, Decimal::from_str("0.025").unwrap());
        assert_eq!(s.pnl_total, Decimal::from(5));
        assert_eq!(s.roi_total, Decimal::from_str("0.05").unwrap());
    }

    #[test]
    fn test_tags_deduplicated() {
        let mut s = summary();
        s.tag("autopause");
        s.tag("autopause");
        assert_eq!(s.tags, vec!["autopause".to_string()]);
    }

    #[test]
    fn test_json_round_trip_for_journal() {
        let s = summary();
        let line = serde_json::to_string(&s).unwrap();
        let back: CycleSummary = serde_json::from_str(&line).unwrap();
        assert_eq!(back, s);
    }
}
