//! uplift-node: command-line entry point
//!
//! Runs one pipeline step (or the full cycle) against an artifact
//! directory. Intended to be invoked once per cadence by a scheduler.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use uplift_node::{NodeConfig, Pipeline};

#[derive(Parser)]
#[command(name = "uplift-node")]
#[command(about = "Bayesian uplift budget allocator")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "uplift-node.toml", env = "UPLIFT_CONFIG")]
    config: PathBuf,

    /// Artifact directory (overrides config file)
    #[arg(short, long, env = "UPLIFT_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Unified table CSV (overrides config file)
    #[arg(short, long, env = "UPLIFT_TABLE")]
    table: Option<PathBuf>,

    /// Total budget (overrides constraints.budget_total)
    #[arg(short, long, env = "UPLIFT_BUDGET")]
    budget: Option<f64>,

    /// Exit non-zero when the verifier reports a hard failure
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Proxies, model, allocate and verify in one cycle
    Run {
        /// Plan horizon label (defaults to the cadence)
        #[arg(long)]
        horizon: Option<String>,
        /// Also search for the budget reaching this incremental value
        #[arg(long)]
        target: Option<f64>,
    },

    /// Re-evaluate proxy credibility
    Proxies,

    /// Update the belief snapshot
    Model,

    /// Produce and verify an allocation plan
    Allocate {
        #[arg(long)]
        horizon: Option<String>,
    },

    /// Verify the stored plan
    Verify,

    /// Find the budget range reaching a target incremental value
    OptimizeBudget {
        #[arg(long)]
        target: f64,
        #[arg(long)]
        horizon: Option<String>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Proxies => "proxies",
            Command::Model => "model",
            Command::Allocate { .. } => "allocate",
            Command::Verify => "verify",
            Command::OptimizeBudget { .. } => "optimize-budget",
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uplift_node=info".parse()?)
                .add_directive("uplift_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!(config = %cli.config.display(), "Starting uplift-node");

    let mut config = NodeConfig::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(dir) = cli.artifacts_dir {
        config.runner.artifacts_dir = dir;
    }
    if let Some(table) = cli.table {
        config.runner.table_path = table;
    }
    if let Some(budget) = cli.budget {
        config.uplift.constraints.budget_total = budget;
        config.uplift.validate()?;
    }

    let default_horizon = config.default_horizon();
    let command = cli.command;
    let mut pipeline = Pipeline::new(config)?;
    let mut hard_fail = false;

    match &command {
        Command::Run { horizon, target } => {
            let horizon = horizon.as_deref().unwrap_or(&default_horizon);
            let summary = pipeline.run(horizon, *target)?;
            hard_fail = summary.report.hard_fail;
            info!(
                allocated = summary.plan.totals.budget_allocated,
                entities = summary.plan.entities.len(),
                hard_fail,
                "Cycle complete"
            );
        }
        Command::Proxies => {
            let table = pipeline.load_table()?;
            let catalog = pipeline.proxies(&table)?;
            info!(proxies = catalog.len(), "Proxy catalog updated");
        }
        Command::Model => {
            let table = pipeline.load_table()?;
            let state = pipeline.model(&table)?;
            info!(entities = state.entities.len(), "Model state updated");
        }
        Command::Allocate { horizon } => {
            let horizon = horizon.as_deref().unwrap_or(&default_horizon);
            let table = pipeline.load_table()?;
            let (_, report) = pipeline.allocate(&table, horizon)?;
            hard_fail = report.hard_fail;
        }
        Command::Verify => {
            let table = pipeline.load_table()?;
            hard_fail = pipeline.verify(&table)?.hard_fail;
        }
        Command::OptimizeBudget { target, horizon } => {
            let horizon = horizon.as_deref().unwrap_or(&default_horizon);
            let result = pipeline.optimize_budget(*target, horizon)?;
            println!(
                "expected budget {:.2} (feasible: {})",
                result.budget_points.expected_budget, result.feasibility.expected
            );
        }
    }

    let manifest = pipeline.finish(command.name())?;
    info!(run_id = %manifest.run_id, "Done");

    if hard_fail && cli.strict {
        eprintln!("Error: plan failed verification; see alerts.json");
        std::process::exit(2);
    }
    Ok(())
}
