//! Simulation scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use chansettle_coordinator::SettlerPhase;
use chansettle_ledger::Fault;

/// Names accepted by [`Scenario::load`].
pub const SCENARIOS: [&str; 5] = [
    "simple-close",
    "pushed-back",
    "initiate-failure",
    "early-withdraw",
    "random",
];

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Clock and deadline changes are relative so a
/// scenario works for any settlement window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Initiate settlement from the local party.
    Init,
    /// Counterparty initiates settlement on its own.
    CounterpartyInitiate,
    /// Start waiting for closure.
    RegisterWaiters { count: usize },
    /// Advance the ledger clock.
    Tick { by: u64 },
    /// Counterparty extends the settlement deadline.
    PushBack { by: u64 },
    /// Make the next matching ledger operation fail.
    InjectFault { fault: FaultKind },
    /// Withdraw the channel funds.
    Withdraw,
    /// Check a condition.
    Assert { condition: AssertCondition },
}

/// Ledger failures that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Query,
    StateSubscription,
    ClockSubscription,
    Nonce,
    Submission,
}

impl From<FaultKind> for Fault {
    fn from(kind: FaultKind) -> Self {
        match kind {
            FaultKind::Query => Fault::Query,
            FaultKind::StateSubscription => Fault::StateSubscription,
            FaultKind::ClockSubscription => Fault::ClockSubscription,
            FaultKind::Nonce => Fault::Nonce,
            FaultKind::Submission => Fault::Submission,
        }
    }
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum AssertCondition {
    /// Settler is in the given phase.
    Phase { phase: SettlerPhase },
    /// Exactly this many waiters have observed closure so far.
    WaitersClosed { count: u64 },
    /// The last withdraw step succeeded or not.
    LastWithdraw { succeeded: bool },
    /// No clock or push-back subscription is live.
    SubscriptionsReleased,
}

/// Knobs shared by all scenarios.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioParams {
    /// Settlement window granted by the ledger.
    pub window: u64,
    /// Waiters registered by scenarios that register any.
    pub waiters: usize,
    /// Seed for the random scenario.
    pub seed: Option<u64>,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str, params: &ScenarioParams) -> anyhow::Result<Self> {
        if params.window < 2 {
            anyhow::bail!("settlement window must be at least 2, got {}", params.window);
        }
        if params.waiters == 0 {
            anyhow::bail!("at least one waiter is required");
        }
        match name {
            "simple-close" => Ok(Self::simple_close(params)),
            "pushed-back" => Ok(Self::pushed_back(params)),
            "initiate-failure" => Ok(Self::initiate_failure(params)),
            "early-withdraw" => Ok(Self::early_withdraw(params)),
            "random" => Ok(Self::random(params)),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                SCENARIOS.join(", ")
            )),
        }
    }

    /// Initiate, wait out the window, withdraw.
    fn simple_close(p: &ScenarioParams) -> Self {
        let waiters = p.waiters as u64;
        Self {
            name: "simple-close".to_string(),
            description: "Settle an active channel and withdraw after the deadline".to_string(),
            steps: vec![
                ScenarioStep::Init,
                ScenarioStep::RegisterWaiters { count: p.waiters },
                ScenarioStep::Tick { by: p.window },
                closed(0),
                ScenarioStep::Tick { by: 1 },
                closed(waiters),
                phase(SettlerPhase::Closed),
                ScenarioStep::Assert {
                    condition: AssertCondition::SubscriptionsReleased,
                },
                ScenarioStep::Withdraw,
                phase(SettlerPhase::Withdrawn),
            ],
        }
    }

    /// Counterparty pushes the deadline back halfway through the window.
    fn pushed_back(p: &ScenarioParams) -> Self {
        let half = p.window / 2;
        let waiters = p.waiters as u64;
        Self {
            name: "pushed-back".to_string(),
            description: "Counterparty extends the deadline while waiters are pending"
                .to_string(),
            steps: vec![
                ScenarioStep::Init,
                ScenarioStep::RegisterWaiters { count: p.waiters },
                ScenarioStep::Tick { by: half },
                ScenarioStep::PushBack { by: p.window },
                // Past the original deadline, before the extended one.
                ScenarioStep::Tick {
                    by: p.window - half + 1,
                },
                closed(0),
                ScenarioStep::Withdraw,
                last_withdraw(false),
                ScenarioStep::Tick { by: p.window },
                closed(waiters),
                ScenarioStep::Withdraw,
                last_withdraw(true),
                phase(SettlerPhase::Withdrawn),
            ],
        }
    }

    /// Our initiate transaction fails; the counterparty's goes through.
    fn initiate_failure(p: &ScenarioParams) -> Self {
        let waiters = p.waiters as u64;
        Self {
            name: "initiate-failure".to_string(),
            description: "Initiate submission fails and the counterparty initiates instead"
                .to_string(),
            steps: vec![
                ScenarioStep::InjectFault {
                    fault: FaultKind::Submission,
                },
                ScenarioStep::Init,
                phase(SettlerPhase::AwaitingClose),
                ScenarioStep::RegisterWaiters { count: p.waiters },
                ScenarioStep::Tick { by: p.window },
                closed(0),
                ScenarioStep::CounterpartyInitiate,
                ScenarioStep::Tick { by: p.window + 1 },
                closed(waiters),
                ScenarioStep::Withdraw,
                last_withdraw(true),
            ],
        }
    }

    /// Withdraw is refused until closure has been observed.
    fn early_withdraw(p: &ScenarioParams) -> Self {
        Self {
            name: "early-withdraw".to_string(),
            description: "Withdraw before closure is rejected locally".to_string(),
            steps: vec![
                ScenarioStep::Init,
                ScenarioStep::Withdraw,
                last_withdraw(false),
                phase(SettlerPhase::AwaitingClose),
                ScenarioStep::RegisterWaiters { count: 1 },
                ScenarioStep::Tick { by: p.window + 1 },
                closed(1),
                ScenarioStep::Withdraw,
                last_withdraw(true),
            ],
        }
    }

    /// Random ticks and push-backs until the deadline passes.
    fn random(p: &ScenarioParams) -> Self {
        let mut rng = match p.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let count = rng.gen_range(1..=p.waiters);
        let mut steps = vec![
            ScenarioStep::Init,
            ScenarioStep::RegisterWaiters { count },
        ];

        let mut now = 0u64;
        let mut deadline = p.window;
        while now <= deadline {
            if rng.gen_bool(0.2) {
                let by = rng.gen_range(1..=p.window / 2);
                deadline += by;
                steps.push(ScenarioStep::PushBack { by });
            } else {
                let by = rng.gen_range(1..=(p.window / 4).max(1));
                now += by;
                steps.push(ScenarioStep::Tick { by });
            }
        }

        steps.push(closed(count as u64));
        steps.push(ScenarioStep::Withdraw);
        steps.push(phase(SettlerPhase::Withdrawn));

        Self {
            name: "random".to_string(),
            description: format!("Randomized settlement with {} waiters", count),
            steps,
        }
    }
}

fn closed(count: u64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::WaitersClosed { count },
    }
}

fn phase(phase: SettlerPhase) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::Phase { phase },
    }
}

fn last_withdraw(succeeded: bool) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::LastWithdraw { succeeded },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(seed: Option<u64>) -> ScenarioParams {
        ScenarioParams {
            window: 100,
            waiters: 3,
            seed,
        }
    }

    #[test]
    fn test_load_known_scenarios() {
        for name in SCENARIOS {
            let scenario = Scenario::load(name, &params(Some(7))).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("bank-run", &params(None)).is_err());
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = Scenario::load("random", &params(Some(42))).unwrap();
        let b = Scenario::load("random", &params(Some(42))).unwrap();
        assert_eq!(
            serde_json::to_string(&a.steps).unwrap(),
            serde_json::to_string(&b.steps).unwrap()
        );
    }

    #[test]
    fn test_tiny_window_rejected() {
        let p = ScenarioParams {
            window: 1,
            waiters: 1,
            seed: None,
        };
        assert!(Scenario::load("simple-close", &p).is_err());
    }

    #[test]
    fn test_steps_serialize_tagged() {
        let json = serde_json::to_value(ScenarioStep::Tick { by: 5 }).unwrap();
        assert_eq!(json["step"], "tick");
        assert_eq!(json["by"], 5);
    }
}
