use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use tally_core::TallyError;
use tally_core::clock::{Clock, ManualClock};
use tally_core::gateway::memory::MemoryRemote;
use tally_core::gateway::{GatewayError, RemoteGateway, StaticAuth};
use tally_core::model::{
    DailyRecord, DayKey, ItemDraft, ItemPatch, Mutation, Progress, Schedule, Symbol, TrackedItem,
    Tracking,
};
use tally_core::outbox::Outbox;
use tally_core::persist::MemoryCollection;
use tally_core::reconcile::merge;
use tally_core::status::derive_symbol;
use tally_core::store::EntityStore;
use tally_core::sync::{SyncController, SyncSettings, SyncState, TriggerOutcome};
use tally_core::tracker::Tracker;

use generators::{at, base_time, item_with, quantitative};

fn day(raw: &str) -> DayKey {
    DayKey::parse(raw).unwrap()
}

struct World {
    clock: Arc<ManualClock>,
    remote: Arc<MemoryRemote>,
    store_backend: Arc<MemoryCollection<tally_core::model::Snapshot>>,
    store: Arc<EntityStore>,
    outbox: Arc<Outbox>,
}

impl World {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(base_time()));
        let remote = Arc::new(MemoryRemote::new(clock.clone()));
        let store_backend = Arc::new(MemoryCollection::new());
        let store = Arc::new(EntityStore::open(Arc::clone(&store_backend)).unwrap());
        let outbox = Arc::new(Outbox::open(MemoryCollection::new(), clock.clone()).unwrap());
        Self {
            clock,
            remote,
            store_backend,
            store,
            outbox,
        }
    }

    fn controller(&self, auth: StaticAuth, gateway: Arc<dyn RemoteGateway>) -> SyncController {
        SyncController::new(
            Arc::clone(&self.store),
            Arc::clone(&self.outbox),
            gateway,
            Arc::new(auth),
            self.clock.clone(),
            SyncSettings::default(),
        )
    }

    fn tracker(&self, auth: StaticAuth) -> Tracker {
        Tracker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.outbox),
            self.remote.clone(),
            Arc::new(auth),
            self.clock.clone(),
            "ana",
        )
    }
}

#[test]
fn scenario_a_newer_local_partial_beats_older_remote_completed() {
    let d = day("2024-01-15");
    let t0 = 10;
    let t1 = 20;
    let local = tally_core::model::snapshot_from([item_with(
        "a",
        BTreeMap::from([(d, quantitative(3, 5, t1))]),
    )]);
    let remote = tally_core::model::snapshot_from([item_with(
        "a",
        BTreeMap::from([(d, quantitative(5, 5, t0))]),
    )]);
    assert_eq!(remote["a"].records[&d].symbol, Symbol::Completed);

    let merged = merge(&local, &remote).snapshot;
    let record = &merged["a"].records[&d];
    assert_eq!(record.symbol, Symbol::Partial);
    assert!(matches!(record.progress, Progress::Quantitative { count: 3, .. }));
}

#[test]
fn scenario_b_drain_keeps_only_the_failed_update() {
    let world = World::new();
    world
        .remote
        .edit(|s| s.create(&item_with("a", BTreeMap::new())).map(|_| ()))
        .unwrap();
    world
        .remote
        .fail_op("update_item", GatewayError::Network("unreachable".into()));

    let mut pending = item_with("tmp-1", BTreeMap::new());
    pending.title = "New habit".into();
    world
        .outbox
        .enqueue(Mutation::CreateItem { item: pending })
        .unwrap();
    let update = Mutation::UpdateItem {
        id: "a".into(),
        patch: ItemPatch {
            archived: Some(true),
            ..ItemPatch::default()
        },
    };
    world.outbox.enqueue(update.clone()).unwrap();

    let report = world.outbox.drain(world.remote.as_ref()).into_inner();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.retained(), 1);

    let left = world.outbox.peek();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].mutation, update);
    assert_eq!(left[0].seq, 2);
}

#[test]
fn scenario_c_zero_goal_is_floored_to_one() {
    let progress = Progress::Quantitative {
        unit: "pages".into(),
        goal: 0,
        count: 1,
    };
    assert_eq!(derive_symbol(&progress), Symbol::Completed);
}

#[test]
fn scenario_d_unauthenticated_trigger_errors_without_touching_store() {
    let world = World::new();
    world.store.put(item_with("a", BTreeMap::new())).unwrap();
    let before = world.store_backend.raw();

    let controller = world.controller(StaticAuth::signed_out(), world.remote.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.subscribe(move |e| sink.lock().unwrap().push((e.from.clone(), e.to.clone())));

    let err = controller.trigger_sync().unwrap_err();
    assert!(matches!(err, TallyError::Auth(_)));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (SyncState::Idle, SyncState::Syncing),
            (SyncState::Syncing, SyncState::Error("unauthenticated".into())),
        ]
    );
    assert_eq!(controller.get_sync_state(), SyncState::Error("unauthenticated".into()));
    assert_eq!(world.store_backend.raw(), before);
    assert_eq!(world.remote.calls("list_items"), 0);
    assert_eq!(controller.get_last_sync_time(), None);
}

#[test]
fn outbox_peek_preserves_enqueue_order() {
    let world = World::new();
    let ids = ["c", "a", "b", "a"];
    for id in ids {
        world
            .outbox
            .enqueue(Mutation::DeleteItem {
                id: id.into(),
                soft: true,
            })
            .unwrap();
    }
    let order: Vec<String> = world
        .outbox
        .peek()
        .iter()
        .map(|e| e.mutation.target_id().to_string())
        .collect();
    assert_eq!(order, ids);
}

#[test]
fn failed_fetch_publishes_nothing() {
    let world = World::new();
    world.store.put(item_with("a", BTreeMap::new())).unwrap();
    world
        .remote
        .edit(|s| s.create(&item_with("b", BTreeMap::new())).map(|_| ()))
        .unwrap();
    world
        .remote
        .fail_op("list_items", GatewayError::Timeout("no answer".into()));
    let before = world.store_backend.raw();

    let controller = world.controller(StaticAuth::online(), world.remote.clone());
    let err = controller.force_sync().unwrap_err();
    assert!(err.is_retryable());
    assert!(controller.get_sync_state().is_error());
    assert_eq!(world.store_backend.raw(), before);
    assert!(world.store.get("b").is_none());
}

#[test]
fn failed_fetch_after_drain_keeps_store_and_remembers_server_id() {
    let world = World::new();
    let tracker = world.tracker(StaticAuth::offline());
    let temp = tracker
        .create_item(ItemDraft {
            title: "Stretch".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
        })
        .unwrap()
        .value
        .id;
    let before = world.store_backend.raw();
    world
        .remote
        .fail_op("list_items", GatewayError::Timeout("no answer".into()));

    let controller = world.controller(StaticAuth::online(), world.remote.clone());
    let err = controller.force_sync().unwrap_err();
    assert!(err.is_retryable());
    assert!(controller.get_sync_state().is_error());
    assert_eq!(world.store_backend.raw(), before);
    assert!(world.store.get(&temp).is_some());
    assert!(world.outbox.is_empty());
    assert_eq!(world.outbox.remapped(&temp).as_deref(), Some("srv-000001"));
    assert_eq!(world.remote.state().len(), 1);

    world.remote.clear_faults();
    let report = controller.force_sync().unwrap().report().cloned().unwrap();
    assert_eq!(report.delivered, 0);
    assert!(world.store.get(&temp).is_none());
    assert_eq!(world.store.get("srv-000001").unwrap().title, "Stretch");
    assert_eq!(world.store.len(), 1);
    assert!(world.outbox.unapplied_remaps().is_empty());
}

#[test]
fn listener_retrigger_during_cycle_returns_immediately() {
    let world = World::new();
    let controller = Arc::new(world.controller(StaticAuth::online(), world.remote.clone()));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    {
        let weak = Arc::downgrade(&controller);
        let outcomes = Arc::clone(&outcomes);
        controller.subscribe(move |event| {
            if matches!(event.to, SyncState::Success | SyncState::Error(_))
                && let Some(controller) = weak.upgrade()
            {
                let outcome = controller.force_sync().unwrap();
                outcomes.lock().unwrap().push(outcome);
            }
        });
    }

    let (done, finished) = std::sync::mpsc::channel();
    {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let outcome = controller.force_sync();
            let _ = done.send(outcome.map(|o| matches!(o, TriggerOutcome::Ran(_))));
        });
    }
    let ran = finished
        .recv_timeout(StdDuration::from_secs(5))
        .expect("outer sync returned")
        .unwrap();
    assert!(ran);
    assert_eq!(*outcomes.lock().unwrap(), vec![TriggerOutcome::Nested]);
    assert_eq!(world.remote.calls("list_items"), 1);
}

#[test]
fn failed_publish_write_keeps_previous_state() {
    let world = World::new();
    world.store.put(item_with("a", BTreeMap::new())).unwrap();
    world
        .remote
        .edit(|s| s.create(&item_with("b", BTreeMap::new())).map(|_| ()))
        .unwrap();
    let before = world.store_backend.raw();
    world.store_backend.fail_writes(true);

    let controller = world.controller(StaticAuth::online(), world.remote.clone());
    let err = controller.force_sync().unwrap_err();
    assert!(matches!(err, TallyError::Storage(_)));
    assert!(controller.get_sync_state().is_error());
    assert_eq!(world.store_backend.raw(), before);
    assert!(world.store.get("b").is_none());
    assert!(world.store.get("a").is_some());
}

/// Returns a record whose progress does not match its item.
struct GarbageGateway;

impl RemoteGateway for GarbageGateway {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        let mut item = item_with("a", BTreeMap::new());
        item.tracking = Tracking::Binary;
        item.records.insert(day("2024-01-15"), quantitative(1, 1, 0));
        Ok(vec![item])
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        Ok(item.clone())
    }

    fn update_item(&self, id: &str, _patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        Err(GatewayError::Conflict(id.to_string()))
    }

    fn delete_item(&self, _id: &str, _soft: bool) -> Result<(), GatewayError> {
        Ok(())
    }

    fn upsert_daily_record(
        &self,
        _item_id: &str,
        _day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        Ok(record.clone())
    }
}

#[test]
fn malformed_remote_snapshot_is_terminal_and_publishes_nothing() {
    let world = World::new();
    world.store.put(item_with("z", BTreeMap::new())).unwrap();
    let before = world.store_backend.raw();

    let controller = world.controller(StaticAuth::online(), Arc::new(GarbageGateway));
    let err = controller.force_sync().unwrap_err();
    assert!(matches!(err, TallyError::MalformedPayload(_)));
    assert!(!err.is_retryable());
    assert_eq!(world.store_backend.raw(), before);
}

#[test]
fn offline_edits_reach_the_server_and_come_back_rekeyed() {
    let world = World::new();
    let offline = world.tracker(StaticAuth::offline());
    let created = offline
        .create_item(ItemDraft {
            title: "Water".into(),
            tracking: Tracking::Quantitative {
                unit: "glasses".into(),
                target: 8,
            },
            schedule: Schedule::Daily,
        })
        .unwrap()
        .value;
    offline.increment(&created.id, day("2024-01-15"), 6).unwrap();
    assert_eq!(world.outbox.len(), 2);

    let controller = world.controller(StaticAuth::online(), world.remote.clone());
    let report = controller.force_sync().unwrap();
    let report = report.report().unwrap().clone();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaps.len(), 1);
    assert!(world.outbox.is_empty());

    let server_id = report.remaps[0].to.clone();
    let local = world.store.get(&server_id).unwrap();
    assert!(world.store.get(&created.id).is_none());
    assert_eq!(local.records[&day("2024-01-15")].symbol, Symbol::Partial);
    assert_eq!(world.store.snapshot().len(), 1);
    assert_eq!(world.remote.state().list().len(), 1);
}

#[test]
fn server_side_edits_and_deletes_are_reconciled() {
    let world = World::new();
    let tracker = world.tracker(StaticAuth::online());
    let id = tracker
        .create_item(ItemDraft {
            title: "Stretch".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
        })
        .unwrap()
        .value
        .id;
    let doomed = tracker
        .create_item(ItemDraft {
            title: "Old habit".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
        })
        .unwrap()
        .value
        .id;

    world.clock.set(at(100));
    world.remote.edit(|s| {
        s.update(
            &id,
            &ItemPatch {
                title: Some("Morning stretch".into()),
                ..ItemPatch::default()
            },
            at(100),
        )
        .unwrap();
        s.delete(&doomed, true, at(100));
    });

    let controller = world.controller(StaticAuth::online(), world.remote.clone());
    let report = controller.force_sync().unwrap();
    let merge = report.report().unwrap().merge;
    assert_eq!(merge.dropped, 1);
    assert_eq!(world.store.get(&id).unwrap().title, "Morning stretch");
    assert!(world.store.get(&doomed).is_none());
}

/// Delays `list_items` until released, so a second trigger arrives mid-cycle.
struct GatedGateway {
    inner: Arc<MemoryRemote>,
    entered: Barrier,
    lists: AtomicUsize,
}

impl RemoteGateway for GatedGateway {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        if self.lists.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.wait();
            thread::sleep(StdDuration::from_millis(50));
        }
        self.inner.list_items()
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        self.inner.create_item(item)
    }

    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        self.inner.update_item(id, patch)
    }

    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError> {
        self.inner.delete_item(id, soft)
    }

    fn upsert_daily_record(
        &self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        self.inner.upsert_daily_record(item_id, day, record)
    }
}

#[test]
fn concurrent_triggers_coalesce_into_one_cycle() {
    let world = World::new();
    let gateway = Arc::new(GatedGateway {
        inner: world.remote.clone(),
        entered: Barrier::new(2),
        lists: AtomicUsize::new(0),
    });
    let controller = Arc::new(world.controller(StaticAuth::online(), gateway.clone()));

    let first = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.force_sync())
    };
    gateway.entered.wait();
    let second = controller.trigger_sync().unwrap();

    let first = first.join().unwrap().unwrap();
    assert!(matches!(first, TriggerOutcome::Ran(_)));
    assert!(matches!(second, TriggerOutcome::Joined(_)));
    assert_eq!(gateway.lists.load(Ordering::SeqCst), 1);
    assert_eq!(first.report(), second.report());
}

#[test]
fn clock_is_shared_with_outbox_stamps() {
    let world = World::new();
    world.clock.set(at(42));
    world
        .outbox
        .enqueue(Mutation::DeleteItem {
            id: "a".into(),
            soft: false,
        })
        .unwrap();
    assert_eq!(world.outbox.peek()[0].queued_at, world.clock.now());
}
