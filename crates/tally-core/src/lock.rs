//! Advisory locks on the sibling `.lock` file of a persisted collection.
//!
//! [`JsonFile`](crate::persist::JsonFile) reads under a shared lock and
//! replaces under an exclusive one. The CLI's directory gateway holds an
//! exclusive lock for a whole load, apply and replace step, so two
//! processes sharing a remote folder never interleave their writes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

/// How long a collection waits on a lock held elsewhere.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const RETRY_EVERY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} stayed locked for {waited:?}", path.display())]
    Contended { path: PathBuf, waited: Duration },
    #[error("cannot open lock file: {0}")]
    Io(#[from] io::Error),
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct CollectionLock {
    file: File,
}

impl CollectionLock {
    /// Lock for reading. Any number of readers may hold it together.
    ///
    /// # Errors
    ///
    /// [`LockError::Contended`] if a writer holds it past `timeout`.
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, false)
    }

    /// Lock for replacing the collection.
    ///
    /// # Errors
    ///
    /// [`LockError::Contended`] if anyone holds it past `timeout`.
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, true)
    }

    fn acquire(path: &Path, timeout: Duration, exclusive: bool) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        loop {
            let taken = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            if taken.is_ok() {
                return Ok(Self { file });
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Contended {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(RETRY_EVERY);
        }
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
