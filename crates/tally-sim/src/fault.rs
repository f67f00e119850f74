//! The simulated server: an authoritative [`RemoteState`] behind a lossy,
//! partitionable link.
//!
//! Fault kinds:
//! - drop: the request never arrives ([`GatewayError::Network`])
//! - timeout: the caller gives up; the server may or may not have applied
//!   the request first ([`GatewayError::Timeout`])
//! - reject: the server refuses an item update or delete
//!   ([`GatewayError::Validation`])
//! - partition: a device is cut off entirely for a while
//!
//! Record upserts and creates are never rejected. A rejected upsert leaves a
//! newer local record the server will never hold, and a rejected create
//! leaves a temp item that is kept locally forever; both are divergence by
//! contract, not bugs, and the oracle would report them.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::clock::{Clock, ManualClock};
use tally_core::gateway::memory::RemoteState;
use tally_core::gateway::{GatewayError, RemoteGateway};
use tally_core::model::{DailyRecord, DayKey, ItemPatch, Snapshot, TrackedItem, snapshot_from};
use tracing::debug;

use crate::rng::DeterministicRng;
use crate::workload;

/// Probabilities for each fault kind, as integer percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    pub drop_rate_percent: u8,
    pub timeout_rate_percent: u8,
    pub reject_rate_percent: u8,
    /// Chance per round that one device's partition state flips.
    pub partition_rate_percent: u8,
    /// Chance per round that the server edits an item on its own.
    pub server_edit_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            drop_rate_percent: 10,
            timeout_rate_percent: 8,
            reject_rate_percent: 3,
            partition_rate_percent: 10,
            server_edit_rate_percent: 15,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            drop_rate_percent: 0,
            timeout_rate_percent: 0,
            reject_rate_percent: 0,
            partition_rate_percent: 0,
            server_edit_rate_percent: 0,
        }
    }
}

/// Injected fault counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultStats {
    pub calls: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub applied_then_timed_out: u64,
    pub rejected: u64,
    pub partitioned: u64,
    pub server_edits: u64,
}

#[derive(Debug)]
struct ServerInner {
    state: RemoteState,
    rng: DeterministicRng,
    partitioned: BTreeSet<usize>,
    faults_enabled: bool,
    stats: FaultStats,
}

/// Shared authoritative copy for every simulated device.
#[derive(Debug)]
pub struct FaultyServer {
    inner: Mutex<ServerInner>,
    clock: Arc<ManualClock>,
    config: FaultConfig,
}

impl FaultyServer {
    #[must_use]
    pub fn new(rng: DeterministicRng, clock: Arc<ManualClock>, config: FaultConfig) -> Self {
        Self {
            inner: Mutex::new(ServerInner {
                state: RemoteState::new(),
                rng,
                partitioned: BTreeSet::new(),
                faults_enabled: true,
                stats: FaultStats {
                    calls: 0,
                    dropped: 0,
                    timed_out: 0,
                    applied_then_timed_out: 0,
                    rejected: 0,
                    partitioned: 0,
                    server_edits: 0,
                },
            }),
            clock,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The gateway one device talks through.
    #[must_use]
    pub fn link(self: &Arc<Self>, device: usize) -> DeviceLink {
        DeviceLink {
            server: Arc::clone(self),
            device,
        }
    }

    #[must_use]
    pub fn state(&self) -> RemoteState {
        self.lock().state.clone()
    }

    /// What `list_items` would return right now, keyed by id.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        snapshot_from(self.lock().state.list())
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.lock().stats
    }

    pub fn set_faults_enabled(&self, enabled: bool) {
        self.lock().faults_enabled = enabled;
    }

    pub fn set_partitioned(&self, device: usize, cut: bool) {
        let mut inner = self.lock();
        if cut {
            inner.partitioned.insert(device);
        } else {
            inner.partitioned.remove(&device);
        }
    }

    #[must_use]
    pub fn is_partitioned(&self, device: usize) -> bool {
        self.lock().partitioned.contains(&device)
    }

    pub fn heal_all(&self) {
        self.lock().partitioned.clear();
    }

    /// Maybe flip one device's partition state.
    pub fn roll_partition(&self, devices: usize) {
        let mut inner = self.lock();
        if !inner.faults_enabled || !inner.rng.hit_rate_percent(self.config.partition_rate_percent) {
            return;
        }
        let bound = u64::try_from(devices).unwrap_or(0);
        let device = usize::try_from(inner.rng.next_bounded(bound)).unwrap_or(0);
        if !inner.partitioned.remove(&device) {
            inner.partitioned.insert(device);
        }
        debug!(device, cut = inner.partitioned.contains(&device), "partition toggled");
    }

    /// Maybe edit a random live item as another client would.
    ///
    /// Returns a short description of the edit, if one happened.
    pub fn roll_server_edit(&self) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.lock();
        if !inner.faults_enabled || !inner.rng.hit_rate_percent(self.config.server_edit_rate_percent) {
            return None;
        }
        let live = inner.state.list();
        let item = inner.rng.pick(&live)?.clone();
        inner.stats.server_edits += 1;
        let ServerInner { state, rng, .. } = &mut *inner;

        let edit = match rng.next_bounded(10) {
            0..=2 => {
                let patch = ItemPatch {
                    title: Some(format!("Server {}", rng.next_bounded(50))),
                    ..ItemPatch::default()
                };
                state.update(&item.id, &patch, now).ok().map(|_| "rename")
            }
            3..=4 => {
                let patch = ItemPatch {
                    archived: Some(!item.archived),
                    ..ItemPatch::default()
                };
                state.update(&item.id, &patch, now).ok().map(|_| "archive")
            }
            5..=8 => {
                let day = workload::random_day(rng, now);
                let progress = workload::random_progress(rng, &item.tracking);
                let record = DailyRecord::new(progress, now, Some("server"));
                state
                    .upsert_record(&item.id, day, &record)
                    .ok()
                    .map(|_| "record")
            }
            _ => {
                state.delete(&item.id, true, now);
                Some("delete")
            }
        };
        edit.map(|kind| format!("{kind} {}", item.id))
    }

    fn call<T>(
        &self,
        device: usize,
        op: &'static str,
        apply: impl FnOnce(&mut RemoteState, DateTime<Utc>) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.stats.calls += 1;

        if inner.partitioned.contains(&device) {
            inner.stats.partitioned += 1;
            return Err(GatewayError::Network(format!("device {device} is partitioned")));
        }
        if inner.faults_enabled {
            let config = self.config;
            if inner.rng.hit_rate_percent(config.drop_rate_percent) {
                inner.stats.dropped += 1;
                return Err(GatewayError::Network(format!("{op} dropped")));
            }
            if inner.rng.hit_rate_percent(config.timeout_rate_percent) {
                inner.stats.timed_out += 1;
                if inner.rng.hit_rate_percent(50) {
                    inner.stats.applied_then_timed_out += 1;
                    let _ = apply(&mut inner.state, now);
                }
                return Err(GatewayError::Timeout(format!("{op} timed out")));
            }
            if matches!(op, "update_item" | "delete_item")
                && inner.rng.hit_rate_percent(config.reject_rate_percent)
            {
                inner.stats.rejected += 1;
                return Err(GatewayError::Validation(format!("{op} rejected")));
            }
        }
        apply(&mut inner.state, now)
    }
}

/// One device's view of the [`FaultyServer`].
#[derive(Debug, Clone)]
pub struct DeviceLink {
    server: Arc<FaultyServer>,
    device: usize,
}

impl RemoteGateway for DeviceLink {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        self.server
            .call(self.device, "list_items", |state, _| Ok(state.list()))
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        self.server
            .call(self.device, "create_item", |state, _| state.create(item))
    }

    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        self.server
            .call(self.device, "update_item", |state, at| state.update(id, patch, at))
    }

    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError> {
        self.server.call(self.device, "delete_item", |state, at| {
            state.delete(id, soft, at);
            Ok(())
        })
    }

    fn upsert_daily_record(
        &self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        self.server.call(self.device, "upsert_daily_record", |state, _| {
            state.upsert_record(item_id, day, record)
        })
    }
}
