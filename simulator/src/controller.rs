//! Simulation controller.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chansettle_common::{AccountId, ChannelId, ChannelState, EventId, Moment};
use chansettle_coordinator::{
    ChannelSettler, InitOutcome, MetricsSnapshot, SettleError, SettlerConfig,
};
use chansettle_crypto::SigningKey;
use chansettle_ledger::{account_of, Call, LedgerSession, MemoryLedger};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Yields granted to waiter tasks after each step.
const YIELD_BUDGET: usize = 64;

/// Final outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub channel_id: ChannelId,
    pub final_time: Moment,
    pub final_state: Option<ChannelState>,
    pub simulation: SimulationMetrics,
    pub settler: MetricsSnapshot,
}

/// Drives one settler against an in-memory ledger.
pub struct SimulationController {
    /// Ledger shared by both parties.
    ledger: Arc<MemoryLedger>,
    /// Account of the local party.
    local: AccountId,
    /// Session of the counterparty, used for its own ledger actions.
    counterparty: LedgerSession,
    channel_id: ChannelId,
    /// Settler of the local party.
    settler: ChannelSettler,
    /// Waiters still running.
    waiters: Vec<JoinHandle<Result<(), SettleError>>>,
    metrics: SimulationMetrics,
    last_withdraw: Option<bool>,
}

impl SimulationController {
    /// Open a channel between two fresh parties and create the local settler.
    pub async fn new(window: Moment) -> anyhow::Result<Self> {
        let ledger = Arc::new(MemoryLedger::new(window));
        let local_key = Arc::new(SigningKey::generate());
        let remote_key = Arc::new(SigningKey::generate());
        let local = account_of(&local_key);
        let remote = account_of(&remote_key);
        let channel_id = ledger.open_channel(local, remote);

        let session = LedgerSession::new(ledger.clone(), ledger.events(), local_key);
        let counterparty = LedgerSession::new(ledger.clone(), ledger.events(), remote_key);

        let config = SettlerConfig::new(remote, channel_id)
            .with_settlement_window(window)
            .apply_env()?;
        let settler = ChannelSettler::create(session, config)
            .await
            .context("creating channel settler")?;

        info!(
            channel_id = %channel_id,
            local = %local.short(),
            remote = %remote.short(),
            "Simulation channel opened"
        );

        Ok(Self {
            ledger,
            local,
            counterparty,
            channel_id,
            settler,
            waiters: Vec::new(),
            metrics: SimulationMetrics::new(),
            last_withdraw: None,
        })
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
            self.metrics.steps += 1;
            self.collect_waiters().await;
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Init => match self.settler.init().await? {
                InitOutcome::Submitted(tx) => info!(tx_hash = %tx.tx_hash, "Init submitted"),
                InitOutcome::SubmissionFailed(e) => warn!(error = %e, "Init submission failed"),
                InitOutcome::AlreadyInitialized => info!("Init already done"),
            },
            ScenarioStep::CounterpartyInitiate => {
                let call = Call::InitiateSettlement {
                    counterparty: self.local,
                };
                let tx = self
                    .counterparty
                    .sign_and_send(call)
                    .await
                    .context("counterparty initiate")?;
                info!(tx_hash = %tx.tx_hash, "Counterparty initiated settlement");
            }
            ScenarioStep::RegisterWaiters { count } => {
                for _ in 0..*count {
                    let settler = self.settler.clone();
                    self.waiters
                        .push(tokio::spawn(async move { settler.once_closed().await }));
                    self.metrics.waiters_registered += 1;
                }
                info!(count, "Waiters registered");
            }
            ScenarioStep::Tick { by } => {
                self.ledger.advance_by(Moment::new(*by));
                info!(now = %self.ledger.now(), "Clock advanced");
            }
            ScenarioStep::PushBack { by } => {
                let current = self
                    .ledger
                    .channel(&self.channel_id)
                    .and_then(|state| state.deadline())
                    .context("push-back needs a pending settlement")?;
                let deadline = current.saturating_add(Moment::new(*by));
                self.ledger.push_back(&self.channel_id, deadline)?;
            }
            ScenarioStep::InjectFault { fault } => {
                info!(?fault, "Injecting fault");
                self.ledger.inject_fault((*fault).into());
            }
            ScenarioStep::Withdraw => {
                let succeeded = match self.settler.withdraw().await {
                    Ok(tx) => {
                        info!(tx_hash = %tx.tx_hash, "Withdraw succeeded");
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, code = e.error_code(), "Withdraw refused");
                        false
                    }
                };
                self.metrics.record_withdraw(succeeded);
                self.last_withdraw = Some(succeeded);
            }
            ScenarioStep::Assert { condition } => {
                let passed = self.check(condition);
                self.metrics.record_assertion(passed);
                if passed {
                    info!(?condition, "Assertion passed");
                } else {
                    warn!(?condition, "Assertion failed");
                }
            }
        }

        Ok(())
    }

    fn check(&self, condition: &AssertCondition) -> bool {
        match condition {
            AssertCondition::Phase { phase } => self.settler.phase() == *phase,
            AssertCondition::WaitersClosed { count } => self.metrics.waiters_closed == *count,
            AssertCondition::LastWithdraw { succeeded } => self.last_withdraw == Some(*succeeded),
            AssertCondition::SubscriptionsReleased => {
                let push_backs = self
                    .ledger
                    .events()
                    .listener_count(&EventId::pushed_back_settlement(self.channel_id));
                self.ledger.counters().active_clock() == 0 && push_backs == 0
            }
        }
    }

    /// Let waiter tasks run, then record the ones that finished.
    async fn collect_waiters(&mut self) {
        for _ in 0..YIELD_BUDGET {
            tokio::task::yield_now().await;
        }

        let (done, running): (Vec<_>, Vec<_>) =
            self.waiters.drain(..).partition(|handle| handle.is_finished());
        self.waiters = running;

        for handle in done {
            self.record_waiter(handle.await);
        }
    }

    fn record_waiter(&mut self, outcome: Result<Result<(), SettleError>, tokio::task::JoinError>) {
        match outcome {
            Ok(Ok(())) => {
                let deadline = self.settler.cached_deadline().unwrap_or(Moment::ZERO);
                let delay = self.ledger.now().saturating_since(deadline);
                self.metrics.record_close(delay.value());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Waiter failed");
                self.metrics.record_waiter_failure();
            }
            Err(e) => {
                warn!(error = %e, "Waiter task aborted");
                self.metrics.record_waiter_failure();
            }
        }
    }

    /// Release the settler's subscriptions, collect every waiter and report.
    pub async fn finish(mut self, scenario: &Scenario) -> SimulationReport {
        let dropped = self.settler.unsubscribe();
        if dropped > 0 {
            warn!(dropped, "Waiters still pending at end of scenario");
        }

        let outcomes = futures::future::join_all(self.waiters.drain(..)).await;
        for outcome in outcomes {
            self.record_waiter(outcome);
        }

        SimulationReport {
            scenario: scenario.name.clone(),
            channel_id: self.channel_id,
            final_time: self.ledger.now(),
            final_state: self.ledger.channel(&self.channel_id),
            simulation: self.metrics.clone(),
            settler: self.settler.metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{ScenarioParams, SCENARIOS};

    async fn run(name: &str) -> SimulationReport {
        let params = ScenarioParams {
            window: 100,
            waiters: 3,
            seed: Some(11),
        };
        let scenario = Scenario::load(name, &params).unwrap();
        let mut controller = SimulationController::new(Moment::new(params.window))
            .await
            .unwrap();
        controller.run_scenario(&scenario).await.unwrap();
        controller.finish(&scenario).await
    }

    #[tokio::test]
    async fn test_all_scenarios_pass() {
        for name in SCENARIOS {
            let report = run(name).await;
            assert_eq!(report.simulation.assertions_failed, 0, "scenario {}", name);
            assert!(report.simulation.assertions_passed > 0);
            assert_eq!(report.final_state, Some(ChannelState::Closed), "scenario {}", name);
            assert_eq!(report.simulation.waiters_failed, 0);
        }
    }

    #[tokio::test]
    async fn test_pushed_back_report() {
        let report = run("pushed-back").await;
        assert_eq!(report.settler.push_backs, 1);
        assert_eq!(report.simulation.withdrawals_rejected, 1);
        assert_eq!(report.simulation.waiters_closed, 3);
        assert_eq!(report.settler.subscriptions_released, 2);
    }

    #[tokio::test]
    async fn test_initiate_failure_is_reported() {
        let report = run("initiate-failure").await;
        assert_eq!(report.settler.initiate_failed, 1);
        assert_eq!(report.settler.initiate_submitted, 0);
    }
}
