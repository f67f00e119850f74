//! A shared directory standing in for the server.
//!
//! The authoritative copy is one JSON document (`remote.json`) holding a
//! [`RemoteState`]. Every mutating call is a read-modify-write under an
//! exclusive advisory lock, so several working copies (or machines sharing
//! the folder) can point at the same directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_core::TallyError;
use tally_core::clock::Clock;
use tally_core::gateway::memory::RemoteState;
use tally_core::gateway::{GatewayError, RemoteGateway};
use tally_core::lock::{CollectionLock, DEFAULT_LOCK_TIMEOUT};
use tally_core::model::{DailyRecord, DayKey, ItemPatch, TrackedItem};
use tally_core::persist::{Collection, JsonFile};
use tracing::debug;

pub const REMOTE_FILE: &str = "remote.json";
const TX_LOCK_FILE: &str = "remote.tx.lock";

/// Local file problems look like an unreachable server: the mutation stays
/// queued and is retried on the next sync.
fn transport_error(err: &TallyError) -> GatewayError {
    match err {
        TallyError::LockContention(msg) => GatewayError::Timeout(msg.clone()),
        other => GatewayError::Network(other.to_string()),
    }
}

pub struct DirGateway {
    dir: PathBuf,
    file: JsonFile<RemoteState>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DirGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirGateway").field("dir", &self.dir).finish_non_exhaustive()
    }
}

impl DirGateway {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let dir = dir.into();
        let file = JsonFile::new(dir.join(REMOTE_FILE));
        Self { dir, file, clock }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reachable(&self) -> Result<(), GatewayError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(GatewayError::Network(format!(
                "remote directory {} is not reachable",
                self.dir.display()
            )))
        }
    }

    fn load(&self) -> Result<RemoteState, GatewayError> {
        self.reachable()?;
        self.file
            .load()
            .map(Option::unwrap_or_default)
            .map_err(|e| transport_error(&e))
    }

    fn transact<T>(
        &self,
        op: &'static str,
        change: impl FnOnce(&mut RemoteState, DateTime<Utc>) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        self.reachable()?;
        let _tx = CollectionLock::exclusive(&self.dir.join(TX_LOCK_FILE), DEFAULT_LOCK_TIMEOUT)
            .map_err(|e| transport_error(&TallyError::from(e)))?;
        let mut state = self.load()?;
        let before = state.clone();
        let out = change(&mut state, self.clock.now())?;
        if state != before {
            self.file.replace(&state).map_err(|e| transport_error(&e))?;
        }
        debug!(op, dir = %self.dir.display(), "remote call");
        Ok(out)
    }
}

impl RemoteGateway for DirGateway {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        Ok(self.load()?.list())
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        self.transact("create_item", |state, _| state.create(item))
    }

    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        self.transact("update_item", |state, at| state.update(id, patch, at))
    }

    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError> {
        self.transact("delete_item", |state, at| {
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
        self.transact("upsert_daily_record", |state, _| {
            state.upsert_record(item_id, day, record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tally_core::clock::ManualClock;
    use tally_core::model::{Schedule, Tracking};

    fn item(id: &str) -> TrackedItem {
        let at = Utc.timestamp_opt(1_705_300_000, 0).unwrap();
        TrackedItem {
            id: id.into(),
            title: "Walk".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
            owner: "ana".into(),
            archived: false,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            records: std::collections::BTreeMap::new(),
        }
    }

    fn gateway(dir: &Path) -> DirGateway {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_705_300_000, 0).unwrap()));
        DirGateway::new(dir, clock)
    }

    #[test]
    fn missing_directory_is_a_retryable_failure() {
        let root = tempfile::tempdir().unwrap();
        let gw = gateway(&root.path().join("absent"));
        let err = gw.list_items().unwrap_err();
        assert!(err.is_retryable());
        assert!(gw.create_item(&item("tmp-1")).unwrap_err().is_retryable());
    }

    #[test]
    fn two_gateways_share_one_copy() {
        let root = tempfile::tempdir().unwrap();
        let a = gateway(root.path());
        let b = gateway(root.path());

        let created = a.create_item(&item("tmp-abc")).unwrap();
        assert_eq!(created.id, "srv-000001");
        let seen = b.list_items().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, created.id);

        // Same client id again: same server item.
        assert_eq!(b.create_item(&item("tmp-abc")).unwrap().id, created.id);
        b.delete_item(&created.id, true).unwrap();
        assert!(a.list_items().unwrap().is_empty());
    }

    #[test]
    fn failed_call_leaves_the_file_alone() {
        let root = tempfile::tempdir().unwrap();
        let gw = gateway(root.path());
        let err = gw
            .update_item("srv-404", &ItemPatch::default())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert!(!root.path().join(REMOTE_FILE).exists());
    }
}
