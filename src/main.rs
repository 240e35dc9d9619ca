use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use rusty_fusion::sim::{CsvSink, ScenarioConfig, Simulation};

/// Simulates a dynamical system and tracks it with a continuous-discrete extended Kalman filter.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 1-based index of the scenario case to run.
    #[arg(default_value_t = 3)]
    case: usize,

    /// Scenario file.
    #[arg(long, short, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Destination of the per-step CSV records.
    #[arg(long, short, value_name = "FILE", default_value = "data.csv")]
    output: PathBuf,

    /// Only simulate ground truth and observations, without running the filter.
    #[arg(long, default_value_t = false)]
    ground_truth_only: bool,

    /// Seed of the random source, overriding the scenario file.
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let scenario = ScenarioConfig::from_file(&args.config)
        .with_context(|| format!("failed to load scenario {}", args.config.display()))?;
    let case = scenario.case(args.case)?;

    let seed = args.seed.or(scenario.seed).unwrap_or_else(time_seed);
    info!(seed, case = %case.name, "seeding random source");
    let mut rng = StdRng::seed_from_u64(seed);

    let mut simulation = Simulation::new(case, args.ground_truth_only)
        .with_context(|| format!("invalid case {}", args.case))?;
    let mut sink = CsvSink::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let summary = simulation.run(&mut rng, &mut sink)?;

    if let Some(step) = summary.diverged_at {
        info!("Run stopped at step {} after the estimate diverged", step);
    }
    info!(
        "Wrote {} records to {}, RMS position error {:.4}",
        summary.steps_completed,
        args.output.display(),
        summary.rms_position_error
    );
    Ok(())
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
