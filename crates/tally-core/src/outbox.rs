//! Outbox: the persisted FIFO of mutations the server has not confirmed.
//!
//! Entries are appended when a direct delivery fails or is skipped and are
//! removed only on confirmation, or when the gateway classifies their
//! failure as terminal. A retryable failure leaves the entry in place and
//! defers later entries for the same item, so a record upsert can never
//! overtake the create it depends on. Entries for other items keep flowing.
//!
//! Draining is single-in-flight: a drain requested while another runs waits
//! for it and receives the same [`DrainReport`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::TallyError;
use crate::flight::{Flight, SingleFlight};
use crate::gateway::{Delivery, GatewayError, RemoteGateway, deliver};
use crate::model::{Mutation, OutboxEntry};
use crate::persist::Collection;

/// Persisted form of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxLog {
    #[serde(default)]
    pub next_seq: u64,
    #[serde(default)]
    pub entries: Vec<OutboxEntry>,
    /// Server ids confirmed by a drain but not yet applied to the entity
    /// store. Cleared once a sync cycle publishes them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remaps: Vec<IdRemap>,
}

/// A client temp id the server replaced with its own id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRemap {
    pub from: String,
    pub to: String,
}

/// An entry whose delivery failed during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub entry: OutboxEntry,
    pub error: GatewayError,
    /// `true` when the entry is still queued (retryable failure).
    pub retained: bool,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: Vec<OutboxEntry>,
    pub failed: Vec<FailedEntry>,
    /// Entries skipped because an earlier entry for the same item failed.
    pub deferred: Vec<u64>,
    pub remaps: Vec<IdRemap>,
    /// Server copies returned by confirmed creates and updates.
    pub confirmed: Vec<Delivery>,
    /// Stopped early because the outbox could not be persisted.
    pub storage_error: Option<TallyError>,
}

impl DrainReport {
    #[must_use]
    pub fn retained(&self) -> usize {
        self.failed.iter().filter(|f| f.retained).count()
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.failed.iter().filter(|f| !f.retained).count()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.deferred.is_empty() && self.storage_error.is_none()
    }
}

struct Inner {
    log: OutboxLog,
    backend: Box<dyn Collection<OutboxLog>>,
}

/// Persisted queue of pending mutations.
pub struct Outbox {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    flight: SingleFlight<DrainReport>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl Outbox {
    /// # Errors
    ///
    /// Returns [`TallyError::Storage`] if the persisted queue cannot be read.
    pub fn open(
        backend: impl Collection<OutboxLog> + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TallyError> {
        let log = backend.load()?.unwrap_or_default();
        debug!(pending = log.entries.len(), "outbox opened");
        Ok(Self {
            inner: Mutex::new(Inner {
                log,
                backend: Box::new(backend),
            }),
            clock,
            flight: SingleFlight::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a change to the log, persisting before publishing.
    fn commit<R>(&self, change: impl FnOnce(&mut OutboxLog) -> R) -> Result<R, TallyError> {
        let mut inner = self.lock();
        let mut working = inner.log.clone();
        let out = change(&mut working);
        inner.backend.replace(&working)?;
        inner.log = working;
        Ok(out)
    }

    /// Append a mutation. Duplicates for the same item are kept.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error; nothing is queued in that case.
    pub fn enqueue(&self, mutation: Mutation) -> Result<u64, TallyError> {
        let queued_at = self.clock.now();
        let seq = self.commit(|log| {
            log.next_seq += 1;
            let seq = log.next_seq;
            log.entries.push(OutboxEntry {
                seq,
                queued_at,
                mutation,
            });
            seq
        })?;
        debug!(seq, "mutation queued");
        Ok(seq)
    }

    /// Queued entries in delivery order.
    #[must_use]
    pub fn peek(&self) -> Vec<OutboxEntry> {
        self.lock().log.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().log.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().log.entries.is_empty()
    }

    /// Whether anything is queued for `item_id`.
    #[must_use]
    pub fn has_pending_for(&self, item_id: &str) -> bool {
        self.lock()
            .log
            .entries
            .iter()
            .any(|e| e.mutation.target_id() == item_id)
    }

    /// Ids of items whose create is still queued.
    #[must_use]
    pub fn pending_creates(&self) -> BTreeSet<String> {
        self.lock()
            .log
            .entries
            .iter()
            .filter(|e| e.mutation.is_create())
            .map(|e| e.mutation.target_id().to_string())
            .collect()
    }

    /// Point queued entries at a server-assigned id.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn retarget(&self, from: &str, to: &str) -> Result<usize, TallyError> {
        self.commit(|log| {
            log.entries
                .iter_mut()
                .map(|e| e.mutation.retarget(from, to))
                .filter(|changed| *changed)
                .count()
        })
    }

    /// Server ids confirmed by earlier drains that the entity store has not
    /// picked up yet, oldest first.
    #[must_use]
    pub fn unapplied_remaps(&self) -> Vec<IdRemap> {
        self.lock().log.remaps.clone()
    }

    /// The server id a confirmed temp id now maps to, if the entity store
    /// still holds the item under the temp id.
    #[must_use]
    pub fn remapped(&self, temp_id: &str) -> Option<String> {
        self.lock()
            .log
            .remaps
            .iter()
            .find(|r| r.from == temp_id)
            .map(|r| r.to.clone())
    }

    /// Forget remaps the entity store has published.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn settle_remaps(&self, applied: &[IdRemap]) -> Result<(), TallyError> {
        if applied.is_empty() {
            return Ok(());
        }
        self.commit(|log| log.remaps.retain(|r| !applied.contains(r)))
    }

    /// Drop every queued entry for `item_id`, as after a hard local delete
    /// of an item the server never saw.
    ///
    /// # Errors
    ///
    /// Returns the backend's write error.
    pub fn discard_for(&self, item_id: &str) -> Result<usize, TallyError> {
        self.commit(|log| {
            let before = log.entries.len();
            log.entries.retain(|e| e.mutation.target_id() != item_id);
            before - log.entries.len()
        })
    }

    /// Deliver queued entries in FIFO order.
    ///
    /// Coalesces with a drain already in progress.
    pub fn drain(&self, gateway: &dyn RemoteGateway) -> Flight<DrainReport> {
        self.flight.run(|| self.drain_pass(gateway))
    }

    #[instrument(skip_all, fields(pending = self.len()))]
    fn drain_pass(&self, gateway: &dyn RemoteGateway) -> DrainReport {
        let mut report = DrainReport::default();
        let mut blocked: BTreeSet<String> = BTreeSet::new();
        let mut cursor = 0_u64;

        loop {
            // Re-read each step: entries can be enqueued or retargeted while
            // the gateway call is outstanding.
            let next = {
                let inner = self.lock();
                inner
                    .log
                    .entries
                    .iter()
                    .find(|e| e.seq > cursor)
                    .cloned()
            };
            let Some(entry) = next else { break };
            cursor = entry.seq;

            let target = entry.mutation.target_id().to_string();
            if blocked.contains(&target) {
                report.deferred.push(entry.seq);
                continue;
            }

            match deliver(gateway, &entry.mutation) {
                Ok(delivery) => {
                    if let Err(err) = self.confirm(&entry, &delivery, &mut report) {
                        warn!(seq = entry.seq, error = %err, "outbox write failed after delivery");
                        report.storage_error = Some(err);
                        break;
                    }
                    debug!(seq = entry.seq, op = entry.mutation.label(), item_id = %target, "delivered");
                    report.succeeded.push(entry);
                    report.confirmed.push(delivery);
                }
                Err(error) if error.is_retryable() => {
                    debug!(seq = entry.seq, item_id = %target, error = %error, "retryable failure; kept queued");
                    blocked.insert(target);
                    report.failed.push(FailedEntry {
                        entry,
                        error,
                        retained: true,
                    });
                }
                Err(error) => {
                    warn!(seq = entry.seq, op = entry.mutation.label(), item_id = %target, error = %error, "terminal failure; dropping mutation");
                    if let Err(err) = self.remove(entry.seq) {
                        report.storage_error = Some(err);
                        break;
                    }
                    report.failed.push(FailedEntry {
                        entry,
                        error,
                        retained: false,
                    });
                }
            }
        }

        if !report.succeeded.is_empty() || !report.failed.is_empty() {
            info!(
                succeeded = report.succeeded.len(),
                retained = report.retained(),
                dropped = report.dropped(),
                deferred = report.deferred.len(),
                "outbox drained"
            );
        }
        report
    }

    fn remove(&self, seq: u64) -> Result<(), TallyError> {
        self.commit(|log| log.entries.retain(|e| e.seq != seq))
    }

    /// Remove a delivered entry and, for a create that came back under a new
    /// id, retarget everything still queued for the temp id.
    fn confirm(
        &self,
        entry: &OutboxEntry,
        delivery: &Delivery,
        report: &mut DrainReport,
    ) -> Result<(), TallyError> {
        let remap = match delivery {
            Delivery::Created(server) if server.id != entry.mutation.target_id() => Some(IdRemap {
                from: entry.mutation.target_id().to_string(),
                to: server.id.clone(),
            }),
            _ => None,
        };
        self.commit(|log| {
            log.entries.retain(|e| e.seq != entry.seq);
            if let Some(remap) = &remap {
                for queued in &mut log.entries {
                    queued.mutation.retarget(&remap.from, &remap.to);
                }
                log.remaps.push(remap.clone());
            }
        })?;
        if let Some(remap) = remap {
            debug!(from = %remap.from, to = %remap.to, "temp id remapped");
            report.remaps.push(remap);
        }
        Ok(())
    }
}
