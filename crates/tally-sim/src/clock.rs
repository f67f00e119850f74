//! Per-device clocks derived from one shared world clock.
//!
//! Devices disagree about "now" by a fixed skew, which is exactly what
//! last-write-wins reconciliation has to tolerate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tally_core::clock::{Clock, ManualClock};

use crate::rng::DeterministicRng;

/// How far device clocks may drift from world time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Largest absolute skew in seconds, either direction.
    pub max_skew_secs: i64,
    /// World time added between rounds.
    pub tick_secs: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_skew_secs: 90,
            tick_secs: 7,
        }
    }
}

impl ClockConfig {
    /// Draw one device's skew.
    #[must_use]
    pub fn sample_skew(&self, rng: &mut DeterministicRng) -> Duration {
        let bound = self.max_skew_secs.abs();
        Duration::seconds(rng.between(-bound, bound))
    }
}

/// World time shifted by a constant skew.
#[derive(Debug)]
pub struct SkewedClock {
    world: Arc<ManualClock>,
    skew: Duration,
}

impl SkewedClock {
    #[must_use]
    pub const fn new(world: Arc<ManualClock>, skew: Duration) -> Self {
        Self { world, skew }
    }

    #[must_use]
    pub const fn skew(&self) -> Duration {
        self.skew
    }
}

impl Clock for SkewedClock {
    fn now(&self) -> DateTime<Utc> {
        self.world.now() + self.skew
    }
}
