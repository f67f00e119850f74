#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tally_sim::campaign::{CampaignConfig, run_campaign, run_single_seed};

/// Run seeded multi-device sync simulations.
#[derive(Debug, Parser)]
#[command(name = "tally-sim", version)]
struct Args {
    /// First seed of the campaign.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    /// Simulated devices per seed.
    #[arg(long, default_value_t = 3)]
    devices: usize,

    /// Rounds per seed.
    #[arg(long, default_value_t = 40)]
    rounds: u64,

    /// Replay only the given seed and print its full result.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = CampaignConfig {
        seed_range: args.seed..args.seed.saturating_add(args.seeds),
        devices: args.devices,
        rounds: args.rounds,
        ..CampaignConfig::default()
    };

    if let Some(seed) = args.replay {
        config.validate()?;
        let result = run_single_seed(seed, &config)?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.oracle.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let report = run_campaign(&config)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} ambiguous_timeouts={} first_failure={}",
            report.seeds_run,
            report.seeds_passed,
            report.ambiguous_timeouts_seen,
            report
                .first_failure
                .map_or_else(|| "none".to_string(), |seed| seed.to_string())
        );
        for failure in &report.failures {
            println!("seed {}:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }
    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
