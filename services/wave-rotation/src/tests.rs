//! Cross-module tests for wave-rotation

#[cfg(test)]
mod tests {
    use crate::config::{ControllerConfig, ExecutionMode, SelectionConfig, VenueSpec};
    use crate::guard::EconomicGuard;
    use crate::market::PoolRecord;
    use crate::policy::SwitchPolicy;
    use crate::scoring::ScoreEngine;
    use crate::selection::select;
    use crate::settlement::SettlementEngine;
    use crate::state::CapitalLedger;
    use crate::treasury::{PayoutOutcome, TreasuryDispatcher};
    use crate::venue::VenueRegistry;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn pool(id: &str, apy: &str) -> PoolRecord {
        PoolRecord {
            pool_id: id.to_string(),
            chain: "base".to_string(),
            project: id.split(':').nth(1).unwrap_or("p").to_string(),
            symbol: "USDC".to_string(),
            apy: dec(apy),
            fee_rate: dec("0.0005"),
            risk_score: Decimal::ZERO,
            tvl_usd: Decimal::from(10_000_000),
            apy_age_minutes: None,
            history: vec![],
            source_id: None,
        }
    }

    #[test]
    fn test_pipeline_picks_highest_yield_and_respects_hysteresis() {
        let cfg = ControllerConfig::default();
        let engine = ScoreEngine::from_config(&cfg);
        let pools = vec![
            pool("base:aave-v3:usdc", "0.050"),
            pool("base:moonwell:usdc", "0.0505"),
            pool("base:compound:usdc", "0.030"),
        ];
        let selection = select(engine.score_all(&pools), &cfg.selection, &VenueRegistry::paper());
        let best = selection.best().unwrap();
        assert_eq!(best.pool_id, "base:moonwell:usdc");

        // 1% relative improvement is required; 0.0505 vs 0.050 is not enough
        let current = selection.find("base:aave-v3:usdc").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let decision = SwitchPolicy::from_config(&cfg.policy).evaluate(Some(best), Some(current), None, now);
        assert!(!decision.switch);
    }

    #[test]
    fn test_guard_rejects_move_worse_than_held() {
        let cfg = ControllerConfig::default();
        let engine = ScoreEngine::from_config(&cfg);
        let good = pool("base:a:usdc", "0.08");
        let worse = pool("base:b:usdc", "0.02");
        let guard = EconomicGuard::from_config(&cfg.guard);
        let decision = guard.should_move(
            Decimal::from(100),
            engine.score(&worse),
            engine.score(&good),
            Decimal::from(480_000),
            Decimal::ZERO,
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn test_live_registry_limits_candidates_to_configured_venues() {
        let mut venues = BTreeMap::new();
        venues.insert(
            "base:aave-v3:usdc".to_string(),
            VenueSpec {
                kind: "aave_v3".to_string(),
                params: [
                    ("pool".to_string(), "0xA238Dd80C259a72e81d7e4664a9801593F98d1c5".to_string()),
                    ("asset".to_string(), "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string()),
                ]
                .into_iter()
                .collect(),
            },
        );
        let cfg = ControllerConfig {
            mode: ExecutionMode::Live,
            venues,
            network: crate::config::NetworkConfig {
                endpoints: vec!["https://mainnet.base.org".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.validate().unwrap();

        let registry = VenueRegistry::from_config(&cfg).unwrap();
        let engine = ScoreEngine::from_config(&cfg);
        let selection = select(
            engine.score_all(&[pool("base:aave-v3:usdc", "0.03"), pool("base:other:usdc", "0.09")]),
            &SelectionConfig::default(),
            &registry,
        );
        assert_eq!(selection.ranked.len(), 1);
        assert_eq!(selection.best().unwrap().pool_id, "base:aave-v3:usdc");
    }

    #[tokio::test]
    async fn test_settlement_feeds_treasury_accounting() {
        let cfg = ControllerConfig::default();
        let engine = SettlementEngine::from_config(&cfg);
        let mut ledger = CapitalLedger::with_capital(Decimal::from(100));

        let settlement = engine.settle(ledger.capital, dec("0.05"));
        ledger.capital = settlement.new_capital;
        let outcome = TreasuryDispatcher::new(&cfg.treasury, None)
            .dispatch(&mut ledger, settlement.treasury_delta)
            .await;

        assert_eq!(outcome, PayoutOutcome::Disabled { booked: dec("2.5") });
        assert_eq!(ledger.capital + ledger.treasury_total, dec("105"));
    }
}
