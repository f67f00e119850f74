//! Deterministic multi-device simulation for tally sync.
//!
//! Several simulated devices share one fault-injecting server. Each round
//! advances world time, may flip a partition or let the server edit an item
//! on its own, and has every device perform random user actions through the
//! real [`tally_core::tracker::Tracker`] and
//! [`tally_core::sync::SyncController`]. Afterwards faults are switched off,
//! every device syncs twice, and the [`oracle`] checks that all devices agree
//! with the server and that no accepted write was lost to an older one.
//!
//! # Conventions
//!
//! - **Errors**: Harness setup returns `anyhow::Result`; invariant failures
//!   are data ([`oracle::InvariantViolation`]), not errors.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod clock;
pub mod device;
pub mod fault;
pub mod oracle;
pub mod rng;
pub mod workload;

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tally_core::clock::ManualClock;
use tally_core::sync::SyncSettings;
use tracing::{debug, info};

use crate::clock::ClockConfig;
use crate::device::{Device, DeviceStats};
use crate::fault::{FaultConfig, FaultStats, FaultyServer};
use crate::oracle::{InvariantViolation, OracleResult};
use crate::rng::DeterministicRng;

/// Fault-free sync passes over all devices before the oracle runs. The first
/// drains every outbox; the second lets early syncers see later deliveries.
pub const QUIESCE_PASSES: usize = 2;

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub devices: usize,
    pub rounds: u64,
    /// User actions each device performs per round.
    pub actions_per_round: u8,
    pub fault: FaultConfig,
    pub clock: ClockConfig,
    /// Post-mutation sync throttle on every device.
    pub min_sync_interval_secs: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            devices: 3,
            rounds: 40,
            actions_per_round: 3,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
            min_sync_interval_secs: 30,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub rounds: u64,
    pub server_items: usize,
    pub faults: FaultStats,
    pub devices: Vec<DeviceStats>,
    pub oracle: OracleResult,
}

fn world_start() -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(1_705_298_400, 0)
        .single()
        .context("simulation start time is out of range")
}

/// One seeded run.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    world: Arc<ManualClock>,
    server: Arc<FaultyServer>,
    devices: Vec<Device>,
}

impl Simulation {
    /// # Errors
    ///
    /// Returns an error for a configuration without devices or rounds.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.devices == 0 {
            bail!("devices must be > 0");
        }
        if config.rounds == 0 {
            bail!("rounds must be > 0");
        }

        let mut rng = DeterministicRng::new(config.seed);
        let world = Arc::new(ManualClock::new(world_start()?));
        let server = Arc::new(FaultyServer::new(rng.fork(u64::MAX), Arc::clone(&world), config.fault));
        let settings = SyncSettings {
            min_interval: Duration::seconds(config.min_sync_interval_secs),
        };

        let mut devices = Vec::with_capacity(config.devices);
        for index in 0..config.devices {
            let mut device_rng = rng.fork(u64::try_from(index).unwrap_or(u64::MAX));
            let skew = config.clock.sample_skew(&mut device_rng);
            let device = Device::new(index, device_rng, Arc::clone(&world), skew, &server, settings)
                .with_context(|| format!("device {index} failed to open"))?;
            debug!(device = index, skew_secs = skew.num_seconds(), "device ready");
            devices.push(device);
        }

        Ok(Self {
            config,
            world,
            server,
            devices,
        })
    }

    #[must_use]
    pub fn server(&self) -> &FaultyServer {
        &self.server
    }

    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Play one round of faults and user actions.
    pub fn round(&mut self) {
        self.world.advance(Duration::seconds(self.config.clock.tick_secs));
        self.server.roll_partition(self.devices.len());
        if let Some(edit) = self.server.roll_server_edit() {
            debug!(%edit, "server edit");
        }
        for device in &mut self.devices {
            for _ in 0..self.config.actions_per_round {
                // Distinct timestamps for consecutive edits of the same day.
                self.world.advance(Duration::seconds(1));
                device.step();
            }
        }
    }

    /// Switch faults off, reconnect everyone and sync every device
    /// [`QUIESCE_PASSES`] times.
    pub fn quiesce(&mut self) -> OracleResult {
        self.server.set_faults_enabled(false);
        self.server.heal_all();
        let mut violations = Vec::new();
        for _ in 0..QUIESCE_PASSES {
            for device in &mut self.devices {
                device.set_online(true);
                self.world.advance(Duration::seconds(1));
                if let Err(err) = device.sync_now() {
                    violations.push(InvariantViolation::QuiesceFailed {
                        device: device.index(),
                        error: err.to_string(),
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Play every round, quiesce, and check the invariants.
    ///
    /// # Errors
    ///
    /// Reserved for harness failures; invariant violations are reported in
    /// the result.
    pub fn run(mut self) -> Result<SimulationResult> {
        for _ in 0..self.config.rounds {
            self.round();
        }
        let quiesced = self.quiesce();
        let state = self.server.state();
        let oracle = quiesced.merge(oracle::check_all(&state, &self.devices));

        info!(
            seed = self.config.seed,
            items = state.list().len(),
            passed = oracle.passed,
            violations = oracle.violations.len(),
            "simulation finished"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            rounds: self.config.rounds,
            server_items: state.list().len(),
            faults: self.server.stats(),
            devices: self.devices.iter().map(Device::stats).collect(),
            oracle,
        })
    }
}
