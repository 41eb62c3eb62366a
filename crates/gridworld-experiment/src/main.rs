//! Grid-world contract-net CLI.
//!
//! Commands:
//! - run: Play one or more games on a grid file or generated grids
//! - generate: Print a generated grid spec as JSON

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cnp_kernel::config::WorkerConfig;
use cnp_kernel::exploration::ExplorationPolicy;
use gridworld_experiment::experiment::{GameRunner, GameRunnerConfig};
use gridworld_experiment::generator::{GeneratorConfig, GridSpec};
use gridworld_experiment::results::{format_duration, GameResults};

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "gridworld")]
#[command(version)]
#[command(about = "Contract-net collectors and repairers on a turn-based grid")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Shape of a generated grid.
#[derive(Args, Clone)]
struct GridArgs {
    #[arg(long, default_value = "16")]
    width: i32,

    #[arg(long, default_value = "16")]
    height: i32,

    /// Fraction of cells that are obstacles
    #[arg(long, default_value = "0.15")]
    obstacle_density: f64,

    #[arg(long, default_value = "3")]
    collectors: usize,

    #[arg(long, default_value = "2")]
    repairers: usize,

    #[arg(long, default_value = "6")]
    materials: usize,

    #[arg(long, default_value = "4")]
    repair_points: usize,

    /// Chebyshev radius within which workers see material
    #[arg(long, default_value = "4")]
    vision_radius: u32,
}

impl GridArgs {
    fn generator_config(&self, seed: Option<u64>) -> GeneratorConfig {
        GeneratorConfig {
            width: self.width,
            height: self.height,
            obstacle_density: self.obstacle_density,
            materials: self.materials,
            repair_points: self.repair_points,
            collectors: self.collectors,
            repairers: self.repairers,
            vision_radius: self.vision_radius,
            seed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Play games
    Run {
        /// Grid spec JSON file. Generated from the grid flags when absent
        #[arg(long)]
        grid: Option<PathBuf>,

        #[command(flatten)]
        shape: GridArgs,

        /// Worker configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exploration policy: frontier or vision_only
        #[arg(long)]
        policy: Option<String>,

        /// Turns before a collector gives up on an accepted handoff
        #[arg(long)]
        handoff_timeout: Option<u64>,

        /// Random seed for grid generation and agents
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "500")]
        max_turns: u64,

        /// Milliseconds workers get to act each turn (actor mode)
        #[arg(long, default_value = "50")]
        turn_interval_ms: u64,

        /// Number of games; trial i uses seed + i
        #[arg(long, default_value = "1")]
        trials: usize,

        /// Run the deterministic single-threaded host instead of actors
        #[arg(long)]
        lockstep: bool,

        /// Output file for results (a timestamp is added to the name)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate a grid spec
    Generate {
        #[command(flatten)]
        shape: GridArgs,

        #[arg(long)]
        seed: Option<u64>,

        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_policy(s: &str) -> Result<ExplorationPolicy> {
    match s.to_lowercase().as_str() {
        "frontier" => Ok(ExplorationPolicy::Frontier),
        "vision_only" | "vision-only" | "vision" => Ok(ExplorationPolicy::VisionOnly),
        _ => anyhow::bail!("Unknown policy: {}. Valid: frontier, vision_only", s),
    }
}

fn load_worker_config(path: Option<&Path>) -> Result<WorkerConfig> {
    let Some(path) = path else {
        return Ok(WorkerConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading worker config {}", path.display()))?;
    let config: WorkerConfig = serde_json::from_str(&json)
        .with_context(|| format!("parsing worker config {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Run {
            grid,
            shape,
            config,
            policy,
            handoff_timeout,
            seed,
            max_turns,
            turn_interval_ms,
            trials,
            lockstep,
            output,
        } => {
            let mut worker = load_worker_config(config.as_deref())?;
            if let Some(policy) = policy {
                worker.exploration.policy = parse_policy(&policy)?;
            }
            if handoff_timeout.is_some() {
                worker.negotiation.handoff_timeout_turns = handoff_timeout;
            }
            worker.validate()?;

            let fixed_grid = grid.as_deref().map(GridSpec::load).transpose()?;

            info!(
                trials,
                lockstep,
                max_turns,
                policy = worker.exploration.policy.name(),
                "Starting run"
            );

            let mut results = GameResults::new();
            for trial in 0..trials {
                let trial_seed = seed.map(|s| s.wrapping_add(trial as u64));
                let spec = match &fixed_grid {
                    Some(spec) => spec.clone(),
                    None => GridSpec::generate(shape.generator_config(trial_seed))?,
                };

                let runner = GameRunner::new(GameRunnerConfig {
                    max_turns,
                    turn_interval_ms,
                    worker: worker.clone(),
                    seed: trial_seed,
                });
                let result = if lockstep {
                    runner.run_lockstep(&spec, trial)?
                } else {
                    runner.run(&spec, trial).await?
                };

                println!(
                    "Trial {}: {:?} after {} turns, {}/{} repaired, {} transfers ({})",
                    trial,
                    result.outcome,
                    result.turns,
                    result.repaired,
                    spec.repair_points.len(),
                    result.transfers,
                    format_duration(result.duration_ms())
                );
                results.add(result);
            }
            results.compute_summary();

            if let Some(summary) = &results.summary {
                println!("\n=== Run Complete ===");
                println!("Games: {}", summary.trials);
                println!("Completion rate: {:.1}%", summary.completion_rate * 100.0);
                println!(
                    "Turns: avg {:.1} ± {:.1} (min {}, max {})",
                    summary.avg_turns, summary.avg_turns_se, summary.min_turns, summary.max_turns
                );
                println!("Avg repaired: {:.2}", summary.avg_repaired);
            }

            if let Some(output) = output {
                let output_path = timestamped_path(&output);
                results.save(&output_path)?;
                println!("Results saved to: {}", output_path.display());
            }
        }

        Commands::Generate {
            shape,
            seed,
            output,
        } => {
            let spec = GridSpec::generate(shape.generator_config(seed))?;
            match output {
                Some(path) => {
                    spec.save(&path)?;
                    info!(path = %path.display(), "Grid spec written");
                }
                None => println!("{}", serde_json::to_string_pretty(&spec)?),
            }
        }
    }

    Ok(())
}
