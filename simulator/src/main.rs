//! ChanSettle Simulator
//!
//! Runs scripted settlement scenarios against an in-memory ledger.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod scenario;
mod controller;
mod metrics;

use chansettle_common::Moment;
use controller::SimulationController;
use scenario::{Scenario, ScenarioParams};

/// ChanSettle Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Payment channel settlement simulator")]
struct Args {
    /// Scenario to run: simple-close, pushed-back, initiate-failure, early-withdraw, random
    #[arg(short, long, default_value = "simple-close")]
    scenario: String,

    /// Settlement window granted by the ledger, in ledger moments
    #[arg(short, long, default_value = "100")]
    window: u64,

    /// Number of close waiters to register
    #[arg(long, default_value = "2")]
    waiters: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs and the final report as JSON
    #[arg(long)]
    json: bool,
}

// Single-threaded so waiter tasks interleave with scenario steps deterministically.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting ChanSettle Simulator");
    info!("Window: {} moments", args.window);

    let params = ScenarioParams {
        window: args.window,
        waiters: args.waiters,
        seed: args.seed,
    };
    let scenario = Scenario::load(&args.scenario, &params)?;

    let mut controller = SimulationController::new(Moment::new(args.window)).await?;
    controller.run_scenario(&scenario).await?;
    let report = controller.finish(&scenario).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let metrics = &report.simulation;
        info!("Simulation complete");
        info!("Final ledger time: {}", report.final_time);
        info!("Waiters closed: {}/{}", metrics.waiters_closed, metrics.waiters_registered);
        info!("Waiters failed: {}", metrics.waiters_failed);
        info!("Average close delay: {} moments", metrics.average_close_delay());
        info!("Max close delay: {} moments", metrics.max_close_delay());
        info!("Withdrawals: {} ok, {} refused", metrics.withdrawals, metrics.withdrawals_rejected);
        info!(
            "Assertions: {} passed, {} failed",
            metrics.assertions_passed, metrics.assertions_failed
        );
    }

    if report.simulation.assertions_failed > 0 {
        anyhow::bail!(
            "{} assertion(s) failed in scenario {}",
            report.simulation.assertions_failed,
            report.scenario
        );
    }

    Ok(())
}
