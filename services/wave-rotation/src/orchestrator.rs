//! Rotation Orchestrator
//!
//! One invocation runs one cycle: lock, kill-switch check, score and rank
//! candidates, decide, guard, move (withdraw then deposit), settle, persist,
//! journal and notify. Collaborators are injected so cycles can run against
//! mocks.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::amount::{wei_to_gwei, wei_to_native};
use crate::clock::{Clock, SystemClock};
use crate::config::ControllerConfig;
use crate::error::{NetworkError, Result};
use crate::guard::{EconomicGuard, GuardDecision};
use crate::kill_switch::{KillSwitch, KillSwitchStatus};
use crate::market::{DefiLlamaSource, MarketDataSource, MarketFilter};
use crate::network::{FailureKind, RpcEndpointPool, RpcInfo};
use crate::notify::{notify_best_effort, CompositeNotifier, Notifier};
use crate::policy::{SwitchDecision, SwitchPolicy};
use crate::run_lock::RunLock;
use crate::scoring::{PoolCandidate, ScoreEngine};
use crate::selection::{select, Selection};
use crate::settlement::{SettlementEngine, SettlementStatus};
use crate::state::{CapitalLedger, ControllerState, RunLockRecord, StateFiles};
use crate::summary::CycleSummary;
use crate::treasury::{PayoutOutcome, QuoteProvider, TreasuryDispatcher, ZeroExClient};
use crate::venue::{VenueOutcome, VenueRegistry, VenueStatus};

/// External collaborators of the controller
pub struct Collaborators {
    pub market: Arc<dyn MarketDataSource>,
    pub venues: VenueRegistry,
    /// Absent in paper runs without endpoints; gas is then unknown
    pub network: Option<RpcEndpointPool>,
    pub quotes: Option<Arc<dyn QuoteProvider>>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Production wiring from configuration
    pub fn from_config(cfg: &ControllerConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let network = if cfg.network.endpoints.is_empty() {
            None
        } else {
            Some(RpcEndpointPool::from_config(&cfg.network, clock.clone()))
        };
        let quotes: Option<Arc<dyn QuoteProvider>> = if cfg.treasury.enabled {
            Some(Arc::new(ZeroExClient::new(&cfg.treasury)?))
        } else {
            None
        };

        Ok(Self {
            market: Arc::new(DefiLlamaSource::new(&cfg.market)?.with_history(cfg.scoring.trend.enabled)),
            venues: VenueRegistry::from_config(cfg)?,
            network,
            quotes,
            notifier: Arc::new(CompositeNotifier::from_config(&cfg.notify)?),
            clock,
        })
    }
}

/// Operator view of the persisted records
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: String,
    pub state_dir: String,
    pub controller: ControllerState,
    pub ledger: CapitalLedger,
    pub kill_switch: KillSwitchStatus,
    pub lock: Option<RunLockRecord>,
    pub rpc: Option<RpcInfo>,
}

/// Candidates and intent for one cycle
struct Evaluation {
    selection: Selection,
    current: Option<PoolCandidate>,
    decision: SwitchDecision,
    /// Net per-cycle rate of every listed pool, eligible or not
    rates: HashMap<String, Decimal>,
}

impl Evaluation {
    fn best(&self) -> Option<&PoolCandidate> {
        self.selection.best()
    }
}

pub struct Rotator {
    cfg: ControllerConfig,
    files: StateFiles,
    market: Arc<dyn MarketDataSource>,
    venues: VenueRegistry,
    network: Option<RpcEndpointPool>,
    treasury: TreasuryDispatcher,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    scorer: ScoreEngine,
    policy: SwitchPolicy,
    guard: EconomicGuard,
    settlement: SettlementEngine,
}

impl Rotator {
    pub fn new(cfg: ControllerConfig, deps: Collaborators) -> Self {
        Self {
            files: StateFiles::new(cfg.state_dir()),
            treasury: TreasuryDispatcher::new(&cfg.treasury, deps.quotes),
            scorer: ScoreEngine::from_config(&cfg),
            policy: SwitchPolicy::from_config(&cfg.policy),
            guard: EconomicGuard::from_config(&cfg.guard),
            settlement: SettlementEngine::from_config(&cfg),
            market: deps.market,
            venues: deps.venues,
            network: deps.network,
            notifier: deps.notifier,
            clock: deps.clock,
            cfg,
        }
    }

    pub fn from_config(cfg: ControllerConfig) -> anyhow::Result<Self> {
        let deps = Collaborators::from_config(&cfg)?;
        Ok(Self::new(cfg, deps))
    }

    pub fn files(&self) -> &StateFiles {
        &self.files
    }

    fn run_lock(&self) -> RunLock {
        RunLock::new(
            self.files.lock_path(),
            Duration::seconds(self.cfg.run_lock.stale_after_secs),
        )
    }

    fn kill_switch(&self) -> Result<KillSwitch> {
        Ok(KillSwitch::load(self.files.kill_switch.clone(), &self.cfg.kill_switch)?)
    }

    /// Run exactly one control cycle
    ///
    /// Holds, skips and failed venue calls are reported in the summary.
    /// Errors are returned for a busy lock, a tripped kill switch, endpoint
    /// exhaustion and unreadable records; all but the busy lock still emit
    /// a summary first.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let now = self.clock.now();
        let lock = self.run_lock().acquire(now)?;
        info!("Cycle start ({} mode)", self.cfg.mode);

        let result = self.cycle(now).await;

        if let Err(e) = lock.release() {
            warn!("Failed to release run lock: {}", e);
        }
        result
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let mut kill_switch = self.kill_switch()?;
        let mut state = self.files.controller.load()?;
        let mut ledger = self.files.load_ledger(self.cfg.settlement.initial_capital)?;

        let mut summary = CycleSummary::new(self.cfg.mode, now, ledger.capital);
        summary.active_pool = state.active_pool_id.clone();
        if state.roll_day(now.date_naive(), &ledger) {
            summary.tag("day_anchor");
        }

        if let Err(tripped) = kill_switch.check(now) {
            error!("{}", tripped);
            summary.pool_decision = "halted:kill_switch".to_string();
            summary.execution = "blocked:kill_switch".to_string();
            summary.tag("kill_switch");
            summary.error(tripped.to_string());
            self.finish(&mut state, &mut ledger, &mut summary, now).await?;
            return Err(tripped.into());
        }

        // Decide
        let eval = self.evaluate(&state, &mut summary, now).await;
        summary.target_pool = eval.best().map(|b| b.pool_id.clone());
        summary.best_score = eval.best().map(|b| b.score);
        summary.current_score = eval.current.as_ref().map(|c| c.score);
        summary.pool_decision = match (eval.decision.switch, eval.best()) {
            (true, Some(best)) => format!("switch:{}->{}", eval.decision.reason.as_str(), best.pool_id),
            _ => format!("hold:{}", eval.decision.reason.as_str()),
        };
        info!("Pool decision: {}", summary.pool_decision);

        // Guard, only when a move could run
        let gate = self.move_gate(&state, &eval, now);
        let mut network_failure: Option<NetworkError> = None;
        let guard = match (&gate, eval.best()) {
            (None, Some(best)) => {
                let best = best.clone();
                match self.guard_move(&state, &ledger, &best, eval.current.as_ref(), &mut summary).await {
                    Ok(decision) => Some(decision),
                    Err(e) => {
                        self.record_failure(&mut kill_switch, &mut summary, &e.to_string(), now)?;
                        network_failure = Some(e);
                        None
                    }
                }
            }
            _ => None,
        };
        summary.guard_decision = match (&guard, &gate) {
            (Some(g), _) if g.allowed => format!("allow:{}", g.reason),
            (Some(g), _) => format!("reject:{}", g.reason),
            (None, Some(skip)) => skip.clone(),
            (None, None) if network_failure.is_some() => "error:network".to_string(),
            (None, None) => "skipped:no_intent".to_string(),
        };
        info!("Guard decision: {}", summary.guard_decision);

        // Execute
        let mut execution_errors = usize::from(network_failure.is_some());
        summary.execution = match (gate, &guard, eval.best().cloned()) {
            (Some(skip), _, _) => skip,
            (None, _, _) if network_failure.is_some() => "skipped:network".to_string(),
            (None, Some(g), Some(target)) if g.allowed => {
                let before = summary.errors.len();
                let line = self
                    .execute_move(&mut state, &target, &mut kill_switch, &mut summary, now)
                    .await?;
                execution_errors = summary.errors.len() - before;
                line
            }
            (None, Some(_), _) => "skipped:guard".to_string(),
            (None, None, _) => "skipped:no_intent".to_string(),
        };
        info!("Execution: {}", summary.execution);

        // Settle
        let rate = state
            .active_pool_id
            .as_ref()
            .and_then(|id| match eval.rates.get(&id.to_lowercase()) {
                Some(rate) => Some(*rate),
                None => {
                    summary.warning(format!("no market data for held pool {}", id));
                    None
                }
            });
        let closed = self.settlement.close_cycle(&mut state, ledger.capital, rate, now);
        if closed.crisis.in_crisis {
            summary.tag("crisis");
        }
        if closed.crisis.paused_now {
            summary.tag("autopause");
        }
        if let Some(note) = &closed.crisis.resume_note {
            summary.tag(note.clone());
        }
        if state.paused {
            summary.tag("paused");
        }

        summary.settlement = match &closed.settlement {
            Some(s) => {
                ledger.capital = s.new_capital;
                format!(
                    "settled:profit={} reinvest={}",
                    s.profit.round_dp(8).normalize(),
                    s.reinvest_ratio.normalize()
                )
            }
            None => closed.status.as_str().to_string(),
        };
        if closed.status == SettlementStatus::Stopped {
            summary.warning(format!(
                "stop-loss breached: threshold {}",
                closed.stop_loss_threshold.normalize()
            ));
        }

        let delta = closed.treasury_delta();
        summary.treasury_delta = delta;
        match self.treasury.dispatch(&mut ledger, delta).await {
            PayoutOutcome::Pending { reason, .. } if reason.starts_with("quote_failed") => {
                summary.tag("treasury:deferred");
                summary.warning(format!("treasury payout deferred: {}", reason));
            }
            PayoutOutcome::Sent { quote_ref, .. } => summary.tag(format!("treasury:{}", quote_ref)),
            outcome => debug!("Treasury: {}", outcome.as_str()),
        }

        if execution_errors == 0 {
            kill_switch.record_success()?;
        }

        self.finish(&mut state, &mut ledger, &mut summary, now).await?;
        match network_failure {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }

    /// Fetch, score, rank and apply the switch policy
    async fn evaluate(&self, state: &ControllerState, summary: &mut CycleSummary, now: DateTime<Utc>) -> Evaluation {
        let filter = MarketFilter {
            chains: self.cfg.selection.chains.iter().map(|c| c.to_lowercase()).collect(),
        };
        let pools = match self.market.fetch_candidates(&filter).await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("Market fetch from {} failed: {}", self.market.name(), e);
                summary.warning(format!("market: {}", e));
                Vec::new()
            }
        };

        let rates: HashMap<String, Decimal> = pools
            .iter()
            .map(|p| (p.pool_id.to_lowercase(), self.scorer.net_rate(p)))
            .collect();

        let selection = select(self.scorer.score_all(&pools), &self.cfg.selection, &self.venues);
        summary.candidates = selection.ranked.len();
        if !selection.excluded.is_empty() {
            debug!("{} candidates excluded", selection.excluded.len());
        }

        let current = state
            .active_pool_id
            .as_deref()
            .and_then(|id| selection.find(id))
            .cloned();
        if let (Some(id), None) = (&state.active_pool_id, &current) {
            summary.warning(format!("held pool {} is not an eligible candidate", id));
        }

        let decision = self
            .policy
            .evaluate(selection.best(), current.as_ref(), state.last_switch_at, now);

        Evaluation {
            selection,
            current,
            decision,
            rates,
        }
    }

    /// Gas ceiling, then the economic edge check in net per-cycle units
    async fn guard_move(
        &mut self,
        state: &ControllerState,
        ledger: &CapitalLedger,
        best: &PoolCandidate,
        current: Option<&PoolCandidate>,
        summary: &mut CycleSummary,
    ) -> std::result::Result<GuardDecision, NetworkError> {
        let gas_wei = match self.network.as_mut() {
            Some(pool) => match pool.gas_price_wei().await {
                Ok(wei) => Some(wei),
                Err(NetworkError::NonRetryable(e)) => {
                    summary.warning(format!("gas price unavailable: {}", e));
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        if gas_wei.is_none() {
            summary.tag("gas:unknown");
        }

        let ceiling = self.guard.check_gas_ceiling(gas_wei.map(wei_to_gwei));
        if !ceiling.allowed {
            return Ok(ceiling);
        }

        let mut units = self.cfg.guard.deposit_units;
        let moving_out = state
            .active_pool_id
            .as_deref()
            .map(|held| !held.eq_ignore_ascii_case(&best.pool_id))
            .unwrap_or(false);
        if moving_out {
            units += self.cfg.guard.withdraw_units;
        }
        if self
            .venues
            .resolve(&best.pool_id)
            .map(|v| v.requires_approval())
            .unwrap_or(false)
        {
            units += self.cfg.guard.approve_units;
        }

        let fee_per_unit = gas_wei.map(wei_to_native).unwrap_or(Decimal::ZERO);
        Ok(self.guard.should_move(
            ledger.capital,
            best.net_score,
            current.map(|c| c.net_score).unwrap_or(Decimal::ZERO),
            Decimal::from(units),
            fee_per_unit,
        ))
    }

    /// Reason no move can happen this cycle, checked before any RPC
    fn move_gate(&self, state: &ControllerState, eval: &Evaluation, now: DateTime<Utc>) -> Option<String> {
        if state.paused {
            return Some("skipped:paused".to_string());
        }
        if !eval.decision.switch || eval.best().is_none() {
            return Some("skipped:no_intent".to_string());
        }
        if let (Some(cooldown), Some(last)) = (self.policy.cooldown, state.last_capital_move_at) {
            if now - last < cooldown {
                return Some("skipped:move_cooldown".to_string());
            }
        }
        None
    }

    /// Withdraw from the held pool (if any) then deposit into `target`
    async fn execute_move(
        &self,
        state: &mut ControllerState,
        target: &PoolCandidate,
        kill_switch: &mut KillSwitch,
        summary: &mut CycleSummary,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let held = state
            .active_pool_id
            .clone()
            .filter(|held| !held.eq_ignore_ascii_case(&target.pool_id));

        if let Some(held) = &held {
            let outcome = match self.venues.resolve(held) {
                Some(venue) => {
                    info!("Withdrawing from {} via {}", held, venue.kind());
                    venue.withdraw_all().await
                }
                None => VenueOutcome::error(format!("no venue registered for held pool {}", held)),
            };
            info!("Withdraw {}: {}", held, outcome.status.as_str());

            if !outcome.status.is_clear() {
                let detail = format!(
                    "withdraw {}: {}{}",
                    held,
                    outcome.status.as_str(),
                    outcome.message.as_deref().map(|m| format!(" ({})", m)).unwrap_or_default()
                );
                if outcome.status.is_failure() {
                    self.record_failure(kill_switch, summary, &detail, now)?;
                } else {
                    summary.warning(detail);
                }
                // nothing moved; keep the current position
                return Ok(format!("withdraw:{}", outcome.status.as_str()));
            }
            state.last_capital_move_at = Some(now);
        }

        let outcome = match self.venues.resolve(&target.pool_id) {
            Some(venue) => {
                info!("Depositing into {} via {}", target.pool_id, venue.kind());
                venue.deposit_all().await
            }
            None => VenueOutcome::error(format!("no venue registered for {}", target.pool_id)),
        };
        info!("Deposit {}: {}", target.pool_id, outcome.status.as_str());

        if outcome.status == VenueStatus::Ok {
            state.active_pool_id = Some(target.pool_id.clone());
            state.active_chain = Some(target.chain.clone());
            state.active_score = target.score;
            state.last_switch_at = Some(now);
            state.last_capital_move_at = Some(now);
            if let Some(tx) = &outcome.tx_ref {
                summary.tag(format!("tx:{}", tx));
            }
            let line = match &held {
                Some(held) => format!("moved:{}->{}", held, target.pool_id),
                None => format!("deposited:{}", target.pool_id),
            };
            return Ok(line);
        }

        let detail = format!(
            "deposit {}: {}{}",
            target.pool_id,
            outcome.status.as_str(),
            outcome.message.as_deref().map(|m| format!(" ({})", m)).unwrap_or_default()
        );
        if outcome.status.is_failure() {
            self.record_failure(kill_switch, summary, &detail, now)?;
        } else {
            summary.warning(detail);
        }
        if held.is_some() {
            // funds are back in the wallet; redeploy next cycle
            state.active_pool_id = None;
            state.active_chain = None;
            state.active_score = Decimal::ZERO;
            summary.tag("idle");
        }
        Ok(format!("deposit:{}", outcome.status.as_str()))
    }

    fn record_failure(
        &self,
        kill_switch: &mut KillSwitch,
        summary: &mut CycleSummary,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let kind = FailureKind::classify(message);
        summary.tag(format!("failure:{}", kind.as_str()));
        summary.error(message.to_string());
        if kill_switch.record_error(message, now)? {
            summary.tag("kill_switch");
        }
        Ok(())
    }

    /// Persist records, journal the summary and notify
    async fn finish(
        &self,
        state: &mut ControllerState,
        ledger: &mut CapitalLedger,
        summary: &mut CycleSummary,
        now: DateTime<Utc>,
    ) -> Result<()> {
        state.updated_at = Some(now);
        ledger.updated_at = Some(now);
        self.files.controller.save(state)?;
        self.files.ledger.save(ledger)?;

        summary.active_pool = state.active_pool_id.clone();
        summary.capital_after = ledger.capital;
        summary.treasury_total = ledger.treasury_total;
        summary.treasury_pending = ledger.treasury_pending;
        summary.set_returns(state.capital_start_day, self.cfg.settlement.initial_capital);

        if let Err(e) = self.files.journal.append(summary) {
            warn!("Failed to append cycle journal: {:#}", e);
        }
        notify_best_effort(self.notifier.as_ref(), &summary.format_text()).await;
        Ok(())
    }

    /// Snapshot of every persisted record
    pub fn status(&self) -> Result<StatusReport> {
        let kill_switch = self.kill_switch()?;
        Ok(StatusReport {
            mode: self.cfg.mode.to_string(),
            state_dir: self.files.root().display().to_string(),
            controller: self.files.controller.load()?,
            ledger: self.files.load_ledger(self.cfg.settlement.initial_capital)?,
            kill_switch: kill_switch.status(),
            lock: self.run_lock().peek(),
            rpc: self.network.as_ref().map(|n| n.info()),
        })
    }

    /// Manual kill-switch reset
    pub fn reset_kill_switch(&self) -> Result<()> {
        let lock = self.run_lock().acquire(self.clock.now())?;
        let mut kill_switch = self.kill_switch()?;
        kill_switch.reset()?;
        drop(lock);
        Ok(())
    }

    /// Manual resume out of an autopause
    pub fn resume(&self) -> Result<ControllerState> {
        let now = self.clock.now();
        let lock = self.run_lock().acquire(now)?;
        let mut state = self.files.controller.load()?;
        if !state.paused {
            info!("Controller is not paused");
        }
        state.resume();
        state.last_resume_attempt_at = Some(now);
        state.updated_at = Some(now);
        self.files.controller.save(&state)?;
        info!("Controller resumed by operator");
        drop(lock);
        Ok(state)
    }
}
