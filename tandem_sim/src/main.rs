//! Tandem DST Simulator CLI
//!
//! Run deterministic multi-participant replication scenarios.

use clap::Parser;
use std::path::PathBuf;
use tandem_sim::scenarios::ScenarioId;
use tandem_sim::{ScenarioResult, ScenarioRunner, SimConfig};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Tandem Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "tandem-sim")]
#[command(about = "Run deterministic replication scenarios for Tandem", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of participants
    #[arg(short, long)]
    participants: Option<usize>,

    /// Scenario to run (steady, churn, jitter, lossy, duplicates, burst, coalesce, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Active phase duration in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export simulation frames to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Load a SimConfig from a JSON file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<SimConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&raw).map_err(|e| format!("invalid config {}: {}", path.display(), e))?
        }
        None => SimConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(participants) = args.participants {
        config.participants = participants;
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    if config.seed == 0 {
        config.seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Tandem DST Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let base = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: steady, churn, jitter, lossy, duplicates, burst, coalesce, all");
            std::process::exit(1);
        })]
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let runner = ScenarioRunner::from_config(base.clone());
        let (result, export) = runner.run_recorded(scenarios[0], 10).await;

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
        } else {
            info!("Exported {} frames to {}", export.frames.len(), export_path);
        }

        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base.seed, export_path);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base.seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::from_config(SimConfig {
            seed,
            ..base.clone()
        });

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: cannot encode results: {}", e);
                std::process::exit(2);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
