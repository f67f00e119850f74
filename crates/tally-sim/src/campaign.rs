//! Campaign runner: many seeds over one parameter set, collecting pass/fail
//! results and the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::ClockConfig;
use crate::fault::FaultConfig;
use crate::{SimulationConfig, SimulationResult, Simulation};

/// Parameters shared by every seed of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub devices: usize,
    pub rounds: u64,
    pub actions_per_round: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
    pub min_sync_interval_secs: i64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            devices: sim.devices,
            rounds: sim.rounds,
            actions_per_round: sim.actions_per_round,
            fault: sim.fault,
            clock: sim.clock,
            min_sync_interval_secs: sim.min_sync_interval_secs,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            devices: self.devices,
            rounds: self.rounds,
            actions_per_round: self.actions_per_round,
            fault: self.fault,
            clock: self.clock,
            min_sync_interval_secs: self.min_sync_interval_secs,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.devices == 0 {
            bail!("devices must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.min_sync_interval_secs < 0 {
            bail!("min_sync_interval_secs must not be negative");
        }
        Ok(())
    }
}

/// Violations found for one seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate over every seed of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which at least one timeout hit after the server applied the
    /// request, the case idempotent creates and upserts exist for.
    pub ambiguous_timeouts_seen: usize,
}

impl CampaignReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every seed in the configured range.
///
/// # Errors
///
/// Returns an error if validation fails or a run cannot be set up.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        ambiguous_timeouts_seen: 0,
    };

    for seed in config.seed_range.clone() {
        let result = run_single_seed(seed, config)?;
        report.seeds_run += 1;
        if result.faults.applied_then_timed_out > 0 {
            report.ambiguous_timeouts_seen += 1;
        }
        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = result.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed with the campaign's parameters.
///
/// # Errors
///
/// Returns an error if the simulation cannot be set up.
pub fn run_single_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulation::new(config.sim_config_for_seed(seed))?.run()
}
