//! One simulated client: its own store, outbox, clock and connectivity,
//! driving the real tracker and sync controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tally_core::TallyError;
use tally_core::clock::{Clock, ManualClock};
use tally_core::gateway::AuthCapability;
use tally_core::model::id::is_temp_id;
use tally_core::model::{DailyRecord, DayKey, DayUpdate, ItemPatch, Mood, Progress, TrackedItem};
use tally_core::outbox::Outbox;
use tally_core::persist::MemoryCollection;
use tally_core::store::EntityStore;
use tally_core::sync::{SyncController, SyncSettings, TriggerOutcome};
use tally_core::tracker::{Dispatch, Receipt, Tracker};
use tracing::{debug, warn};

use crate::clock::SkewedClock;
use crate::fault::FaultyServer;
use crate::rng::DeterministicRng;
use crate::workload;

/// Devices stop creating items past this many live ones.
const MAX_ITEMS: usize = 8;

/// Signed in for the whole run; connectivity toggles.
#[derive(Debug)]
pub struct SimAuth {
    online: AtomicBool,
}

impl SimAuth {
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl AuthCapability for SimAuth {
    fn is_actor_authenticated(&self) -> bool {
        true
    }

    fn can_sync(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A day record a device committed locally and expected the server to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenDay {
    pub device: usize,
    /// Item id as the device knew it at write time; may be a temp id.
    pub item_id: String,
    pub day: DayKey,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub creates: u64,
    pub item_updates: u64,
    pub deletes: u64,
    pub day_writes: u64,
    pub queued: u64,
    pub rejected: u64,
    pub local_errors: u64,
    pub syncs_ok: u64,
    pub syncs_failed: u64,
    pub throttled: u64,
    pub reconnects: u64,
}

pub struct Device {
    index: usize,
    rng: DeterministicRng,
    clock: Arc<SkewedClock>,
    auth: Arc<SimAuth>,
    tracker: Tracker,
    controller: Arc<SyncController>,
    stats: DeviceStats,
    ledger: Vec<WrittenDay>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("skew", &self.clock.skew())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// # Errors
    ///
    /// Opening the in-memory store or outbox cannot fail in practice; the
    /// error is propagated anyway.
    pub fn new(
        index: usize,
        rng: DeterministicRng,
        world: Arc<ManualClock>,
        skew: Duration,
        server: &Arc<FaultyServer>,
        settings: SyncSettings,
    ) -> Result<Self, TallyError> {
        let clock = Arc::new(SkewedClock::new(world, skew));
        let auth = Arc::new(SimAuth::new(true));
        let store = EntityStore::open(MemoryCollection::new())?;
        let outbox = Outbox::open(MemoryCollection::new(), clock.clone())?;
        let tracker = Tracker::new(
            Arc::new(store),
            Arc::new(outbox),
            Arc::new(server.link(index)),
            auth.clone(),
            clock.clone(),
            format!("device-{index}"),
        );
        let controller = Arc::new(tracker.controller(settings));
        let tracker = tracker.with_auto_sync(Arc::clone(&controller));
        Ok(Self {
            index,
            rng,
            clock,
            auth,
            tracker,
            controller,
            stats: DeviceStats::default(),
            ledger: Vec::new(),
        })
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[must_use]
    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    #[must_use]
    pub fn ledger(&self) -> &[WrittenDay] {
        &self.ledger
    }

    #[must_use]
    pub const fn stats(&self) -> DeviceStats {
        self.stats
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.auth.can_sync()
    }

    pub fn set_online(&self, online: bool) {
        self.auth.set_online(online);
    }

    /// Live items in an order that does not depend on random temp ids.
    fn candidates(&self) -> Vec<TrackedItem> {
        let mut items: Vec<TrackedItem> = self
            .tracker
            .store()
            .snapshot()
            .into_values()
            .filter(|item| !item.is_deleted())
            .collect();
        items.sort_by_cached_key(|item| {
            if is_temp_id(&item.id) {
                (true, item.title.clone())
            } else {
                (false, item.id.clone())
            }
        });
        items
    }

    fn pick_item(&mut self) -> Option<TrackedItem> {
        let items = self.candidates();
        self.rng.pick(&items).cloned()
    }

    /// Perform one random user action.
    pub fn step(&mut self) {
        let roll = self.rng.next_bounded(100);
        match roll {
            0..=9 => self.create(),
            10..=54 => self.write_day(),
            55..=62 => self.update(),
            63..=65 => self.delete(),
            66..=67 => self.clear(),
            68..=84 => self.trigger(),
            85..=91 => self.toggle_online(),
            _ => {}
        }
    }

    fn note_dispatch(&mut self, dispatch: &Dispatch) {
        match dispatch {
            Dispatch::Queued { .. } => self.stats.queued += 1,
            Dispatch::Rejected(_) => self.stats.rejected += 1,
            Dispatch::Delivered | Dispatch::Unchanged => {}
        }
    }

    fn local_error(&mut self, action: &str, err: &TallyError) {
        match err {
            TallyError::Validation(_) | TallyError::NotFound(_) => {
                debug!(device = self.index, action, error = %err, "action refused");
            }
            _ => warn!(device = self.index, action, error = %err, "action failed"),
        }
        self.stats.local_errors += 1;
    }

    fn create(&mut self) {
        if self.candidates().len() >= MAX_ITEMS {
            return;
        }
        let draft = workload::random_draft(&mut self.rng);
        match self.tracker.create_item(draft) {
            Ok(receipt) => {
                self.stats.creates += 1;
                self.note_dispatch(&receipt.dispatch);
            }
            Err(err) => self.local_error("create", &err),
        }
    }

    fn update(&mut self) {
        let Some(item) = self.pick_item() else { return };
        let patch = if self.rng.hit_rate_percent(50) {
            let base = item.title.split(" v").next().unwrap_or("Habit");
            ItemPatch {
                title: Some(format!("{base} v{}", self.rng.next_bounded(9))),
                ..ItemPatch::default()
            }
        } else {
            ItemPatch {
                archived: Some(!item.archived),
                ..ItemPatch::default()
            }
        };
        match self.tracker.update_item(&item.id, patch) {
            Ok(receipt) => {
                self.stats.item_updates += 1;
                self.note_dispatch(&receipt.dispatch);
            }
            Err(err) => self.local_error("update", &err),
        }
    }

    fn delete(&mut self) {
        let Some(item) = self.pick_item() else { return };
        let soft = self.rng.hit_rate_percent(70);
        match self.tracker.delete_item(&item.id, soft) {
            Ok(receipt) => {
                if is_temp_id(&item.id) {
                    // Its queued writes were discarded with it.
                    self.ledger.retain(|w| w.item_id != item.id);
                }
                self.stats.deletes += 1;
                self.note_dispatch(&receipt.dispatch);
            }
            Err(err) => self.local_error("delete", &err),
        }
    }

    fn record(&mut self, item_id: &str, day: DayKey, receipt: &Receipt<DailyRecord>) {
        self.note_dispatch(&receipt.dispatch);
        if matches!(receipt.dispatch, Dispatch::Unchanged | Dispatch::Rejected(_)) {
            return;
        }
        self.stats.day_writes += 1;
        self.ledger.push(WrittenDay {
            device: self.index,
            item_id: item_id.to_string(),
            day,
            updated_at: receipt.value.updated_at,
        });
    }

    fn write_day(&mut self) {
        let Some(item) = self.pick_item() else { return };
        let day = workload::random_day(&mut self.rng, self.clock.now());
        let result = match item.tracking.empty_progress() {
            Progress::Binary { .. } => {
                let marker = workload::random_marker(&mut self.rng);
                self.tracker.mark_binary(&item.id, day, marker)
            }
            Progress::Quantitative { .. } if self.rng.hit_rate_percent(70) => {
                let delta = self.rng.between(-2, 5);
                self.tracker.increment(&item.id, day, delta)
            }
            Progress::TimeBased { .. } if self.rng.hit_rate_percent(60) => {
                match self.rng.next_bounded(3) {
                    0 => self.tracker.start_timer(&item.id, day),
                    1 => self.tracker.pause_timer(&item.id, day),
                    _ => self.tracker.stop_timer(&item.id, day),
                }
            }
            _ => {
                let progress = workload::random_progress(&mut self.rng, &item.tracking);
                let mut update = DayUpdate::progress(progress);
                if self.rng.hit_rate_percent(30) {
                    update = update.with_note(format!("note {}", self.rng.next_bounded(100)));
                }
                if self.rng.hit_rate_percent(20) {
                    update = update.with_mood(Mood::Good);
                }
                self.tracker.log_day(&item.id, day, update)
            }
        };
        match result {
            Ok(receipt) => self.record(&item.id, day, &receipt),
            Err(err) => self.local_error("log", &err),
        }
    }

    fn clear(&mut self) {
        let Some(item) = self.pick_item() else { return };
        let Some(day) = item.records.keys().next_back().copied() else {
            return;
        };
        match self.tracker.clear_day(&item.id, day) {
            Ok(Receipt {
                value: Some(value),
                dispatch,
            }) => {
                let receipt = Receipt { value, dispatch };
                self.record(&item.id, day, &receipt);
            }
            Ok(_) => {}
            Err(err) => self.local_error("clear", &err),
        }
    }

    fn trigger(&mut self) {
        match self.controller.trigger_sync() {
            Ok(TriggerOutcome::Throttled { .. }) => self.stats.throttled += 1,
            Ok(_) => self.stats.syncs_ok += 1,
            Err(err) => {
                debug!(device = self.index, error = %err, "sync failed");
                self.stats.syncs_failed += 1;
            }
        }
        self.controller.acknowledge();
    }

    fn toggle_online(&mut self) {
        let online = !self.is_online();
        self.set_online(online);
        if online {
            self.stats.reconnects += 1;
            if let Err(err) = self.controller.on_reconnected() {
                debug!(device = self.index, error = %err, "reconnect sync failed");
                self.stats.syncs_failed += 1;
            } else {
                self.stats.syncs_ok += 1;
            }
            self.controller.acknowledge();
        }
    }

    /// Unthrottled sync used while quiescing. The settled state is left in
    /// place for inspection.
    ///
    /// # Errors
    ///
    /// The cycle's error.
    pub fn sync_now(&mut self) -> Result<TriggerOutcome, TallyError> {
        let outcome = self.controller.force_sync();
        if outcome.is_ok() {
            self.stats.syncs_ok += 1;
        } else {
            self.stats.syncs_failed += 1;
        }
        outcome
    }
}
