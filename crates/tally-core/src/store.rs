//! Entity store: the durable, exclusively-owned local copy of every item.
//!
//! All writes go through [`EntityStore::commit`], which runs the change on a
//! working copy while holding the store's exclusive section, persists the
//! full collection, and only then swaps the working copy in. A failed
//! persist leaves both the in-memory and the durable state untouched.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::TallyError;
use crate::model::{Snapshot, TrackedItem};
use crate::persist::Collection;

struct Inner {
    items: Snapshot,
    backend: Box<dyn Collection<Snapshot>>,
}

/// Local source of truth for tracked items and their daily records.
pub struct EntityStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("items", &self.lock().items.len())
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Open the store, loading whatever the backend last committed.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Storage`] if the persisted collection cannot be
    /// read or decoded.
    pub fn open(backend: impl Collection<Snapshot> + 'static) -> Result<Self, TallyError> {
        let items = backend.load()?.unwrap_or_default();
        debug!(items = items.len(), "entity store opened");
        Ok(Self {
            inner: Mutex::new(Inner {
                items,
                backend: Box::new(backend),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the full current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().items.clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<TrackedItem> {
        self.lock().items.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Run `change` on a working copy inside the exclusive section, persist
    /// the result, then publish it.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error or the backend's write error. In both
    /// cases nothing is published.
    pub fn commit<R>(
        &self,
        change: impl FnOnce(&mut Snapshot) -> Result<R, TallyError>,
    ) -> Result<R, TallyError> {
        let mut inner = self.lock();
        let mut working = inner.items.clone();
        let out = change(&mut working)?;
        if working == inner.items {
            return Ok(out);
        }
        if let Err(err) = inner.backend.replace(&working) {
            warn!(error = %err, "entity store write failed; keeping previous state");
            return Err(err);
        }
        inner.items = working;
        Ok(out)
    }

    /// Insert or overwrite one item.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn put(&self, item: TrackedItem) -> Result<(), TallyError> {
        self.commit(|items| {
            items.insert(item.id.clone(), item);
            Ok(())
        })
    }

    /// Apply `edit` to an existing item.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::NotFound`] for an unknown id, the closure's own
    /// error, or the backend's write error.
    pub fn update<R>(
        &self,
        id: &str,
        edit: impl FnOnce(&mut TrackedItem) -> Result<R, TallyError>,
    ) -> Result<R, TallyError> {
        self.commit(|items| {
            let item = items
                .get_mut(id)
                .ok_or_else(|| TallyError::NotFound(id.to_string()))?;
            edit(item)
        })
    }

    /// Remove an item entirely. Returns the removed item, if it existed.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn remove(&self, id: &str) -> Result<Option<TrackedItem>, TallyError> {
        self.commit(|items| Ok(items.remove(id)))
    }

    /// Replace the whole state, as after a successful merge.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn replace_all(&self, next: Snapshot) -> Result<(), TallyError> {
        self.commit(|items| {
            *items = next;
            Ok(())
        })
    }

    /// Move an item from a client temp id to its server-assigned id.
    ///
    /// A no-op when `from` is unknown or both ids are equal. If an item is
    /// already stored under `to` (a fetch adopted it first), the local item
    /// replaces it: it carries everything the server copy has plus any
    /// not-yet-delivered local days.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn rekey(&self, from: &str, to: &str) -> Result<bool, TallyError> {
        if from == to {
            return Ok(false);
        }
        self.commit(|items| Ok(move_item(items, from, to)))
    }
}

/// Re-key `from` to `to` inside a working snapshot. See [`EntityStore::rekey`].
pub fn move_item(items: &mut Snapshot, from: &str, to: &str) -> bool {
    if from == to {
        return false;
    }
    let Some(mut item) = items.remove(from) else {
        return false;
    };
    item.id = to.to_string();
    items.insert(to.to_string(), item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Schedule, Tracking};
    use crate::persist::MemoryCollection;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn item(id: &str, title: &str) -> TrackedItem {
        let at = Utc.timestamp_opt(1_705_300_000, 0).unwrap();
        TrackedItem {
            id: id.into(),
            title: title.into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
            owner: "ana".into(),
            archived: false,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            records: BTreeMap::new(),
        }
    }

    #[test]
    fn put_persists_and_reopen_restores() {
        let backend = Arc::new(MemoryCollection::new());
        let store = EntityStore::open(Arc::clone(&backend)).unwrap();
        store.put(item("a", "Walk")).unwrap();

        let reopened = EntityStore::open(Arc::clone(&backend)).unwrap();
        assert_eq!(reopened.get("a").map(|i| i.title), Some("Walk".to_string()));
    }

    #[test]
    fn failed_write_publishes_nothing() {
        let backend = Arc::new(MemoryCollection::new());
        let store = EntityStore::open(Arc::clone(&backend)).unwrap();
        store.put(item("a", "Walk")).unwrap();
        let bytes_before = backend.raw();

        backend.fail_writes(true);
        let err = store.put(item("b", "Read")).unwrap_err();
        assert!(matches!(err, TallyError::Storage(_)));
        assert!(store.get("b").is_none());
        assert_eq!(backend.raw(), bytes_before);
    }

    #[test]
    fn closure_error_publishes_nothing() {
        let store = EntityStore::open(MemoryCollection::new()).unwrap();
        store.put(item("a", "Walk")).unwrap();
        let result: Result<(), _> = store.commit(|items| {
            items.clear();
            Err(TallyError::Conflict("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = EntityStore::open(MemoryCollection::new()).unwrap();
        let err = store.update("ghost", |_| Ok(())).unwrap_err();
        assert_eq!(err, TallyError::NotFound("ghost".into()));
    }

    #[test]
    fn rekey_moves_item_and_rewrites_id() {
        let store = EntityStore::open(MemoryCollection::new()).unwrap();
        store.put(item("tmp-1", "Walk")).unwrap();
        assert!(store.rekey("tmp-1", "srv-7").unwrap());
        assert!(store.get("tmp-1").is_none());
        assert_eq!(store.get("srv-7").map(|i| i.id), Some("srv-7".to_string()));
        assert!(!store.rekey("tmp-1", "srv-8").unwrap());
    }
}
