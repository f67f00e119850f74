//! In-memory authoritative copy.
//!
//! [`RemoteState`] is the server side of the contract: id assignment,
//! idempotent creates keyed by the client's temp id, and recency-guarded
//! record upserts. [`MemoryRemote`] wraps it as a [`RemoteGateway`] with
//! scriptable failures for tests; the simulator and the CLI's directory
//! remote reuse the same state type.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GatewayError, RemoteGateway};
use crate::clock::Clock;
use crate::model::id::is_temp_id;
use crate::model::{DailyRecord, DayKey, ItemPatch, TrackedItem};

/// Server-held state, serializable so it can live in a shared file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    #[serde(default)]
    next_id: u64,
    /// All items, including soft-deleted ones.
    #[serde(default)]
    items: BTreeMap<String, TrackedItem>,
    /// Client temp id to assigned server id.
    #[serde(default)]
    client_ids: BTreeMap<String, String>,
}

impl RemoteState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.client_ids.get(id).map_or(id, String::as_str)
    }

    fn live_mut(&mut self, id: &str) -> Result<&mut TrackedItem, GatewayError> {
        let id = self.resolve(id).to_string();
        match self.items.get_mut(&id) {
            Some(item) if !item.is_deleted() => Ok(item),
            _ => Err(GatewayError::Conflict(format!("item {id} does not exist"))),
        }
    }

    /// The `listItems` response: every non-deleted item.
    #[must_use]
    pub fn list(&self) -> Vec<TrackedItem> {
        self.items
            .values()
            .filter(|item| !item.is_deleted())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TrackedItem> {
        self.items.get(self.resolve(id))
    }

    /// Server id assigned to a client temp id, if the create was seen.
    #[must_use]
    pub fn assigned_id(&self, client_id: &str) -> Option<&str> {
        self.client_ids.get(client_id).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Create an item; a repeated create for the same client id returns the
    /// item created the first time.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] for an empty title or records whose
    /// progress does not match the item's kind.
    pub fn create(&mut self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        if let Some(existing) = self.get(&item.id) {
            return Ok(existing.clone());
        }
        if item.title.trim().is_empty() {
            return Err(GatewayError::Validation("title must not be empty".into()));
        }
        for (day, record) in &item.records {
            item.check_progress(&record.progress)
                .map_err(|e| GatewayError::Validation(format!("{day}: {e}")))?;
        }

        let mut stored = item.clone();
        if is_temp_id(&item.id) {
            self.next_id += 1;
            stored.id = format!("srv-{:06}", self.next_id);
            self.client_ids.insert(item.id.clone(), stored.id.clone());
        }
        stored.records = stored
            .records
            .into_iter()
            .map(|(day, record)| (day, record.normalized()))
            .collect();
        debug!(client_id = %item.id, item_id = %stored.id, "remote item created");
        self.items.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    /// # Errors
    ///
    /// [`GatewayError::Conflict`] for an unknown or deleted item,
    /// [`GatewayError::Validation`] for a tracking kind change.
    pub fn update(
        &mut self,
        id: &str,
        patch: &ItemPatch,
        at: DateTime<Utc>,
    ) -> Result<TrackedItem, GatewayError> {
        let item = self.live_mut(id)?;
        if let Some(tracking) = &patch.tracking
            && tracking.kind() != item.kind()
        {
            return Err(GatewayError::Validation(format!(
                "tracking kind cannot change from {} to {}",
                item.kind(),
                tracking.kind()
            )));
        }
        patch.apply_to(item, at);
        Ok(item.clone())
    }

    /// Deleting an unknown item succeeds; deletes are idempotent.
    pub fn delete(&mut self, id: &str, soft: bool, at: DateTime<Utc>) {
        let id = self.resolve(id).to_string();
        if soft {
            if let Some(item) = self.items.get_mut(&id)
                && item.deleted_at.is_none()
            {
                item.deleted_at = Some(at);
                item.updated_at = at;
            }
        } else {
            self.items.remove(&id);
        }
    }

    /// Store a day's record unless the stored one is at least as recent.
    ///
    /// Returns the record the server holds afterwards.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Conflict`] for an unknown or deleted item,
    /// [`GatewayError::Validation`] for progress of another kind.
    pub fn upsert_record(
        &mut self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        let item = self.live_mut(item_id)?;
        item.check_progress(&record.progress)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        if let Some(stored) = item.records.get(&day)
            && stored.updated_at >= record.updated_at
        {
            return Ok(stored.clone());
        }
        let record = record.clone().normalized();
        item.records.insert(day, record.clone());
        Ok(record)
    }
}

#[derive(Debug, Clone)]
enum Fault {
    Offline,
    Op(&'static str, GatewayError),
}

/// [`RemoteState`] behind a mutex, with scriptable failures.
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    clock: Arc<dyn Clock>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("items", &lock(&self.state).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryRemote {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_state(RemoteState::new(), clock)
    }

    #[must_use]
    pub fn with_state(state: RemoteState, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(state),
            clock,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Clone of the server-side state.
    #[must_use]
    pub fn state(&self) -> RemoteState {
        lock(&self.state).clone()
    }

    /// Edit server state directly, as another device or the server would.
    pub fn edit<R>(&self, change: impl FnOnce(&mut RemoteState) -> R) -> R {
        change(&mut lock(&self.state))
    }

    /// Fail every call with [`GatewayError::Network`] until cleared.
    pub fn set_offline(&self, offline: bool) {
        let mut faults = lock(&self.faults);
        faults.retain(|f| !matches!(f, Fault::Offline));
        if offline {
            faults.push(Fault::Offline);
        }
    }

    /// Fail every call of operation `op` (a [`Mutation::label`] or
    /// `"list_items"`) with `err` until cleared.
    ///
    /// [`Mutation::label`]: crate::model::Mutation::label
    pub fn fail_op(&self, op: &'static str, err: GatewayError) {
        lock(&self.faults).push(Fault::Op(op, err));
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// How many times `op` was attempted, failures included.
    #[must_use]
    pub fn calls(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    fn enter(&self, op: &'static str) -> Result<(), GatewayError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        for fault in lock(&self.faults).iter() {
            match fault {
                Fault::Offline => return Err(GatewayError::Network(format!("{op}: offline"))),
                Fault::Op(name, err) if *name == op => return Err(err.clone()),
                Fault::Op(..) => {}
            }
        }
        Ok(())
    }
}

impl RemoteGateway for MemoryRemote {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        self.enter("list_items")?;
        Ok(lock(&self.state).list())
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        self.enter("create_item")?;
        lock(&self.state).create(item)
    }

    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        self.enter("update_item")?;
        let at = self.clock.now();
        lock(&self.state).update(id, patch, at)
    }

    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError> {
        self.enter("delete_item")?;
        let at = self.clock.now();
        lock(&self.state).delete(id, soft, at);
        Ok(())
    }

    fn upsert_daily_record(
        &self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        self.enter("upsert_daily_record")?;
        lock(&self.state).upsert_record(item_id, day, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Progress, Schedule, Tracking};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_300_000 + secs, 0).unwrap()
    }

    fn draft(id: &str) -> TrackedItem {
        TrackedItem {
            id: id.into(),
            title: "Water".into(),
            tracking: Tracking::Quantitative {
                unit: "glasses".into(),
                target: 8,
            },
            schedule: Schedule::Daily,
            owner: "ana".into(),
            archived: false,
            deleted_at: None,
            created_at: at(0),
            updated_at: at(0),
            records: BTreeMap::new(),
        }
    }

    fn glasses(count: u32, secs: i64) -> DailyRecord {
        DailyRecord::new(
            Progress::Quantitative {
                unit: "glasses".into(),
                goal: 8,
                count,
            },
            at(secs),
            None,
        )
    }

    #[test]
    fn create_assigns_server_id_once_per_client_id() {
        let mut remote = RemoteState::new();
        let first = remote.create(&draft("tmp-abc")).unwrap();
        let again = remote.create(&draft("tmp-abc")).unwrap();
        assert_eq!(first.id, "srv-000001");
        assert_eq!(again.id, first.id);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote.assigned_id("tmp-abc"), Some("srv-000001"));
    }

    #[test]
    fn upsert_keeps_newer_stored_record() {
        let mut remote = RemoteState::new();
        let id = remote.create(&draft("tmp-a")).unwrap().id;
        let day = DayKey::parse("2024-01-15").unwrap();

        remote.upsert_record(&id, day, &glasses(5, 20)).unwrap();
        let kept = remote.upsert_record(&id, day, &glasses(2, 10)).unwrap();
        assert_eq!(kept.updated_at, at(20));

        let newer = remote.upsert_record(&id, day, &glasses(8, 30)).unwrap();
        assert_eq!(newer.updated_at, at(30));
    }

    #[test]
    fn upsert_rejects_kind_mismatch_and_unknown_items() {
        let mut remote = RemoteState::new();
        let id = remote.create(&draft("tmp-a")).unwrap().id;
        let day = DayKey::parse("2024-01-15").unwrap();
        let binary = DailyRecord::new(Progress::Binary { marker: None }, at(1), None);
        assert!(matches!(
            remote.upsert_record(&id, day, &binary),
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            remote.upsert_record("srv-999999", day, &glasses(1, 1)),
            Err(GatewayError::Conflict(_))
        ));
    }

    #[test]
    fn temp_ids_resolve_after_create() {
        let mut remote = RemoteState::new();
        remote.create(&draft("tmp-a")).unwrap();
        let patch = ItemPatch {
            title: Some("Hydrate".into()),
            ..ItemPatch::default()
        };
        let updated = remote.update("tmp-a", &patch, at(5)).unwrap();
        assert_eq!(updated.title, "Hydrate");
    }

    #[test]
    fn soft_deleted_items_leave_the_listing() {
        let mut remote = RemoteState::new();
        let id = remote.create(&draft("tmp-a")).unwrap().id;
        remote.delete(&id, true, at(3));
        assert!(remote.list().is_empty());
        assert!(remote.get(&id).is_some_and(TrackedItem::is_deleted));
        remote.delete("srv-424242", false, at(4));
    }

    #[test]
    fn scripted_faults_apply_per_operation() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at(0)));
        let remote = MemoryRemote::new(clock);
        remote.fail_op("create_item", GatewayError::Timeout("slow".into()));
        assert!(remote.create_item(&draft("tmp-a")).is_err());
        assert!(remote.list_items().is_ok());

        remote.clear_faults();
        remote.set_offline(true);
        assert!(matches!(remote.list_items(), Err(GatewayError::Network(_))));
        assert_eq!(remote.calls("list_items"), 2);
        assert_eq!(remote.calls("create_item"), 1);
    }
}
