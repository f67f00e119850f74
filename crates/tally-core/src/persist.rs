//! Durable backends for whole-collection persistence.
//!
//! Both the entity store and the outbox are persisted as one JSON document
//! each, replaced in full on every committed change. The file backend writes
//! to a sibling temp file and renames it over the target, so readers only
//! ever observe the previous or the next complete collection.

use std::fs;
use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::TallyError;
use crate::lock::{CollectionLock, DEFAULT_LOCK_TIMEOUT, LockError};

/// A single persisted collection value.
pub trait Collection<T>: Send + Sync {
    /// Load the last committed value, or `None` if nothing was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Storage`] when the stored bytes cannot be read
    /// or decoded.
    fn load(&self) -> Result<Option<T>, TallyError>;

    /// Atomically replace the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Storage`] or [`TallyError::LockContention`]; on
    /// error the previously committed value is still intact.
    fn replace(&self, value: &T) -> Result<(), TallyError>;
}

impl From<LockError> for TallyError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contended { .. } => Self::LockContention(err.to_string()),
            LockError::Io(_) => Self::Storage(err.to_string()),
        }
    }
}

/// JSON file with a sibling advisory lock file.
#[derive(Debug)]
pub struct JsonFile<T> {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    _value: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            _value: PhantomData,
        }
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl<T> Collection<T> for JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, TallyError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _guard = CollectionLock::shared(&self.lock_path, self.lock_timeout)?;
        let bytes = fs::read(&self.path)
            .map_err(|e| TallyError::Storage(format!("read {}: {e}", self.path.display())))?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| TallyError::Storage(format!("decode {}: {e}", self.path.display())))?;
        Ok(Some(value))
    }

    fn replace(&self, value: &T) -> Result<(), TallyError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| TallyError::Storage(format!("encode {}: {e}", self.path.display())))?;

        let _guard = CollectionLock::exclusive(&self.lock_path, self.lock_timeout)?;
        let tmp = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            TallyError::Storage(format!("write {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "collection replaced");
        Ok(())
    }
}

/// In-memory backend holding the serialized JSON.
///
/// Storing bytes rather than the value keeps load/replace honest about
/// serialization, and lets tests compare persisted state byte for byte.
#[derive(Debug)]
pub struct MemoryCollection<T> {
    bytes: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
    _value: PhantomData<fn() -> T>,
}

impl<T> Default for MemoryCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryCollection<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            _value: PhantomData,
        }
    }

    /// Make subsequent `replace` calls fail, simulating a full disk.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw persisted bytes, if anything was written.
    #[must_use]
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl<T> Collection<T> for MemoryCollection<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, TallyError> {
        let guard = self
            .bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(|e| TallyError::Storage(format!("decode memory collection: {e}")))
    }

    fn replace(&self, value: &T) -> Result<(), TallyError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TallyError::Storage("simulated write failure".into()));
        }
        let bytes = serde_json::to_vec(value)
            .map_err(|e| TallyError::Storage(format!("encode memory collection: {e}")))?;
        *self
            .bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(bytes);
        Ok(())
    }
}

impl<T, C> Collection<T> for std::sync::Arc<C>
where
    C: Collection<T> + ?Sized,
{
    fn load(&self) -> Result<Option<T>, TallyError> {
        (**self).load()
    }

    fn replace(&self, value: &T) -> Result<(), TallyError> {
        (**self).replace(value)
    }
}
