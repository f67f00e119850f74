use std::sync::Arc;

use tally_core::clock::ManualClock;
use tally_core::gateway::StaticAuth;
use tally_core::gateway::memory::MemoryRemote;
use tally_core::model::{DayKey, ItemDraft, Schedule, Symbol, Tracking};
use tally_core::outbox::Outbox;
use tally_core::persist::JsonFile;
use tally_core::store::EntityStore;
use tally_core::tracker::Tracker;


fn open(dir: &std::path::Path, clock: &Arc<ManualClock>, remote: &Arc<MemoryRemote>) -> Tracker {
    let store = EntityStore::open(JsonFile::new(dir.join("items.json"))).unwrap();
    let outbox = Outbox::open(JsonFile::new(dir.join("outbox.json")), clock.clone()).unwrap();
    Tracker::new(
        Arc::new(store),
        Arc::new(outbox),
        remote.clone(),
        Arc::new(StaticAuth::offline()),
        clock.clone(),
        "ana",
    )
}

#[test]
fn offline_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(generators::base_time()));
    let remote = Arc::new(MemoryRemote::new(clock.clone()));
    let day = DayKey::parse("2024-01-15").unwrap();

    let id = {
        let tracker = open(dir.path(), &clock, &remote);
        let id = tracker
            .create_item(ItemDraft {
                title: "Push-ups".into(),
                tracking: Tracking::Quantitative {
                    unit: "reps".into(),
                    target: 20,
                },
                schedule: Schedule::Daily,
            })
            .unwrap()
            .value
            .id;
        tracker.increment(&id, day, 12).unwrap();
        id
    };

    let tracker = open(dir.path(), &clock, &remote);
    let item = tracker.store().get(&id).unwrap();
    assert_eq!(item.records[&day].symbol, Symbol::Partial);
    let queued: Vec<&str> = tracker
        .outbox()
        .peek()
        .iter()
        .map(|e| e.mutation.label())
        .collect();
    assert_eq!(queued, vec!["create_item", "upsert_daily_record"]);
    assert!(!dir.path().join("items.json.tmp").exists());
}

#[test]
fn persisted_collection_is_keyed_by_id_and_day() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(generators::base_time()));
    let remote = Arc::new(MemoryRemote::new(clock.clone()));
    let tracker = open(dir.path(), &clock, &remote);
    let id = tracker
        .create_item(ItemDraft {
            title: "Stretch".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
        })
        .unwrap()
        .value
        .id;
    tracker
        .mark_binary(
            &id,
            DayKey::parse("2024-01-15").unwrap(),
            Some(tally_core::model::BinaryMarker::Done),
        )
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("items.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let record = &json[&id]["records"]["2024-01-15"];
    assert_eq!(record["symbol"], "completed");
    assert_eq!(record["progress"]["kind"], "binary");
    assert_eq!(record["progress"]["marker"], "done");
}
