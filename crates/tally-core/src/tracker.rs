//! Local-first mutation commands.
//!
//! Every command validates its input, commits to the entity store, and only
//! then talks to the network: attempt the gateway directly, and on a
//! retryable failure (or without the capability to try) enqueue the
//! mutation in the outbox. A network problem never fails the user's action.
//!
//! A direct attempt is skipped while the outbox still holds entries for the
//! same item, so the new mutation queues behind them and cannot overtake
//! them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Limits;
use crate::error::{TallyError, ValidationError};
use crate::gateway::{AuthCapability, Delivery, GatewayError, RemoteGateway, deliver};
use crate::model::id::{is_temp_id, new_temp_id};
use crate::model::{
    BinaryMarker, DailyRecord, DayKey, DayUpdate, ItemDraft, ItemPatch, Mutation, Progress,
    TrackedItem, TrackingKind,
};
use crate::outbox::Outbox;
use crate::store::EntityStore;
use crate::sync::{SyncController, SyncSettings};

/// Why a mutation went to the outbox instead of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    /// Not authenticated, or outbound calls are not possible.
    NotReady,
    /// Earlier mutations for the same item are still queued.
    Behind,
    Retryable(GatewayError),
}

/// What happened to the network half of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Queued { seq: u64, reason: QueueReason },
    /// The server refused the mutation for good. The local change stands
    /// until the next sync reconciles it.
    Rejected(GatewayError),
    /// Nothing changed, so nothing was sent.
    Unchanged,
}

impl Dispatch {
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Result of a local command: the committed value and its dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt<T> {
    pub value: T,
    pub dispatch: Dispatch,
}

/// Entry point for local mutations and reads.
pub struct Tracker {
    store: Arc<EntityStore>,
    outbox: Arc<Outbox>,
    gateway: Arc<dyn RemoteGateway>,
    auth: Arc<dyn AuthCapability>,
    clock: Arc<dyn Clock>,
    limits: Limits,
    actor: String,
    auto_sync: Option<Arc<SyncController>>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("actor", &self.actor)
            .field("limits", &self.limits)
            .field("auto_sync", &self.auto_sync.is_some())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    #[must_use]
    pub fn new(
        store: Arc<EntityStore>,
        outbox: Arc<Outbox>,
        gateway: Arc<dyn RemoteGateway>,
        auth: Arc<dyn AuthCapability>,
        clock: Arc<dyn Clock>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            store,
            outbox,
            gateway,
            auth,
            clock,
            limits: Limits::default(),
            actor: actor.into(),
            auto_sync: None,
        }
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Fire a throttled sync after each successful command.
    #[must_use]
    pub fn with_auto_sync(mut self, controller: Arc<SyncController>) -> Self {
        self.auto_sync = Some(controller);
        self
    }

    /// A controller over the same store, outbox, gateway and capability.
    #[must_use]
    pub fn controller(&self, settings: SyncSettings) -> SyncController {
        SyncController::new(
            Arc::clone(&self.store),
            Arc::clone(&self.outbox),
            Arc::clone(&self.gateway),
            Arc::clone(&self.auth),
            Arc::clone(&self.clock),
            settings,
        )
    }

    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Look up by exact id, then by case-insensitive title among items not
    /// deleted.
    #[must_use]
    pub fn find(&self, id_or_title: &str) -> Option<TrackedItem> {
        if let Some(item) = self.store.get(id_or_title) {
            return Some(item);
        }
        let wanted = id_or_title.trim().to_lowercase();
        self.store
            .snapshot()
            .into_values()
            .find(|item| !item.is_deleted() && item.title.to_lowercase() == wanted)
    }

    /// Items that are neither archived nor deleted, ordered by title.
    #[must_use]
    pub fn active_items(&self) -> Vec<TrackedItem> {
        let mut items: Vec<TrackedItem> = self
            .store
            .snapshot()
            .into_values()
            .filter(TrackedItem::is_active)
            .collect();
        items.sort_by_key(|item| item.title.to_lowercase());
        items
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn live(&self, id: &str) -> Result<TrackedItem, TallyError> {
        self.store
            .get(id)
            .filter(|item| !item.is_deleted())
            .ok_or_else(|| TallyError::NotFound(id.to_string()))
    }

    fn check_title(&self, raw: &str, except_id: Option<&str>) -> Result<String, ValidationError> {
        let title = raw.trim().to_string();
        let len = title.chars().count();
        if len < self.limits.title_min || len > self.limits.title_max {
            return Err(ValidationError::TitleLength {
                len,
                min: self.limits.title_min,
                max: self.limits.title_max,
            });
        }
        let lowered = title.to_lowercase();
        let taken = self.store.snapshot().values().any(|item| {
            !item.is_deleted()
                && Some(item.id.as_str()) != except_id
                && item.title.to_lowercase() == lowered
        });
        if taken {
            return Err(ValidationError::DuplicateTitle(title));
        }
        Ok(title)
    }

    fn check_note(&self, note: Option<&str>) -> Result<(), ValidationError> {
        let len = note.map_or(0, |n| n.chars().count());
        if len > self.limits.note_max {
            return Err(ValidationError::NoteTooLong {
                len,
                max: self.limits.note_max,
            });
        }
        Ok(())
    }

    /// Attempt the gateway, falling back to the outbox.
    fn dispatch(&self, mut mutation: Mutation) -> Result<(Dispatch, Option<Delivery>), TallyError> {
        let mut target = mutation.target_id().to_string();
        if let Some(server_id) = self.outbox.remapped(&target) {
            mutation.retarget(&target, &server_id);
            target = server_id;
        }
        let reason = if !self.auth.ready() {
            QueueReason::NotReady
        } else if self.outbox.has_pending_for(&target) {
            QueueReason::Behind
        } else {
            match deliver(self.gateway.as_ref(), &mutation) {
                Ok(delivery) => {
                    debug!(op = mutation.label(), item_id = %target, "delivered directly");
                    return Ok((Dispatch::Delivered, Some(delivery)));
                }
                Err(err) if err.is_retryable() => QueueReason::Retryable(err),
                Err(err) => {
                    warn!(op = mutation.label(), item_id = %target, error = %err, "server rejected mutation");
                    return Ok((Dispatch::Rejected(err), None));
                }
            }
        };
        let op = mutation.label();
        let seq = self.outbox.enqueue(mutation)?;
        debug!(seq, op, item_id = %target, ?reason, "mutation queued");
        Ok((Dispatch::Queued { seq, reason }, None))
    }

    fn after_mutation(&self) {
        if let Some(controller) = &self.auto_sync
            && controller.can_attempt()
            && let Err(err) = controller.trigger_sync()
        {
            debug!(error = %err, "post-mutation sync failed");
        }
    }

    /// Create an item under a client temp id.
    ///
    /// # Errors
    ///
    /// [`TallyError::Validation`] for a bad title or schedule (nothing is
    /// written), or a storage error.
    pub fn create_item(&self, draft: ItemDraft) -> Result<Receipt<TrackedItem>, TallyError> {
        let title = self.check_title(&draft.title, None)?;
        let schedule = draft.schedule.normalize()?;
        let now = self.now();
        let item = TrackedItem {
            id: new_temp_id(&title, now),
            title,
            tracking: draft.tracking,
            schedule,
            owner: self.actor.clone(),
            archived: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            records: std::collections::BTreeMap::new(),
        };
        self.store.put(item.clone())?;
        info!(item_id = %item.id, title = %item.title, "item created");

        let (dispatch, delivery) = self.dispatch(Mutation::CreateItem { item: item.clone() })?;
        let mut value = item;
        if let Some(Delivery::Created(server)) = delivery
            && server.id != value.id
        {
            self.store.rekey(&value.id, &server.id)?;
            self.outbox.retarget(&value.id, &server.id)?;
            value.id = server.id;
        }
        self.after_mutation();
        Ok(Receipt { value, dispatch })
    }

    /// Change an item's title, goal parameters, schedule or archived flag.
    ///
    /// # Errors
    ///
    /// [`TallyError::NotFound`], [`TallyError::Validation`] (including a
    /// tracking kind change), or a storage error.
    pub fn update_item(&self, id: &str, mut patch: ItemPatch) -> Result<Receipt<TrackedItem>, TallyError> {
        let current = self.live(id)?;
        if patch.is_empty() {
            return Ok(Receipt {
                value: current,
                dispatch: Dispatch::Unchanged,
            });
        }
        if let Some(title) = &patch.title {
            patch.title = Some(self.check_title(title, Some(id))?);
        }
        if let Some(tracking) = &patch.tracking
            && tracking.kind() != current.kind()
        {
            return Err(ValidationError::KindChange {
                from: current.kind(),
                to: tracking.kind(),
            }
            .into());
        }
        if let Some(schedule) = patch.schedule.take() {
            patch.schedule = Some(schedule.normalize()?);
        }

        let now = self.now();
        let value = self.store.update(id, |item| {
            patch.apply_to(item, now);
            Ok(item.clone())
        })?;
        let (dispatch, _) = self.dispatch(Mutation::UpdateItem {
            id: id.to_string(),
            patch,
        })?;
        self.after_mutation();
        Ok(Receipt { value, dispatch })
    }

    /// Delete an item, softly (tombstone) or for good.
    ///
    /// An item the server has never confirmed is removed outright and its
    /// queued mutations are discarded; nothing is sent.
    ///
    /// # Errors
    ///
    /// [`TallyError::NotFound`] or a storage error.
    pub fn delete_item(&self, id: &str, soft: bool) -> Result<Receipt<()>, TallyError> {
        self.live(id)?;
        if is_temp_id(id) && self.outbox.remapped(id).is_none() {
            self.store.remove(id)?;
            let discarded = self.outbox.discard_for(id)?;
            info!(item_id = %id, discarded, "unconfirmed item deleted locally");
            return Ok(Receipt {
                value: (),
                dispatch: Dispatch::Unchanged,
            });
        }

        if soft {
            let now = self.now();
            self.store.update(id, |item| {
                item.deleted_at = Some(now);
                item.updated_at = now;
                Ok(())
            })?;
        } else {
            self.store.remove(id)?;
        }
        info!(item_id = %id, soft, "item deleted");
        let (dispatch, _) = self.dispatch(Mutation::DeleteItem {
            id: id.to_string(),
            soft,
        })?;
        self.after_mutation();
        Ok(Receipt { value: (), dispatch })
    }

    /// Upsert one day's record.
    ///
    /// The symbol is always derived from the record's progress. An update
    /// without progress keeps the day's existing progress, or the item's
    /// empty progress on a new day. `Some("")` as the note clears it.
    ///
    /// # Errors
    ///
    /// [`TallyError::NotFound`], [`TallyError::Validation`] for a progress
    /// of another kind or an over-long note, or a storage error.
    pub fn log_day(&self, item_id: &str, day: DayKey, update: DayUpdate) -> Result<Receipt<DailyRecord>, TallyError> {
        let item = self.live(item_id)?;
        if let Some(progress) = &update.progress {
            item.check_progress(progress)?;
        }
        self.check_note(update.note.as_deref())?;

        let now = self.now();
        let mut record = item
            .records
            .get(&day)
            .cloned()
            .unwrap_or_else(|| DailyRecord::new(item.tracking.empty_progress(), now, None));
        if let Some(progress) = update.progress {
            record.progress = progress;
        }
        if let Some(note) = update.note {
            record.note = (!note.is_empty()).then_some(note);
        }
        if let Some(mood) = update.mood {
            record.mood = Some(mood);
        }
        record.cleared_at = None;
        self.write_day(&item, day, record, now)
    }

    fn write_day(
        &self,
        item: &TrackedItem,
        day: DayKey,
        mut record: DailyRecord,
        now: DateTime<Utc>,
    ) -> Result<Receipt<DailyRecord>, TallyError> {
        record.touch(now, Some(&self.actor));
        let record = record.normalized();
        self.store.update(&item.id, |stored| {
            stored.records.insert(day, record.clone());
            Ok(())
        })?;
        debug!(item_id = %item.id, %day, symbol = %record.symbol, "day logged");

        let (dispatch, delivery) = self.dispatch(Mutation::UpsertDailyRecord {
            item_id: item.id.clone(),
            day,
            record: record.clone(),
        })?;
        let mut value = record;
        if let Some(Delivery::RecordStored(server)) = delivery
            && server.updated_at > value.updated_at
        {
            // The server already held a newer record for this day.
            let adopted = server.normalized();
            self.store.update(&item.id, |stored| {
                stored.records.insert(day, adopted.clone());
                Ok(())
            })?;
            value = adopted;
        }
        self.after_mutation();
        Ok(Receipt { value, dispatch })
    }

    fn day_progress(item: &TrackedItem, day: DayKey) -> Progress {
        item.records
            .get(&day)
            .map_or_else(|| item.tracking.empty_progress(), |r| r.progress.clone())
    }

    fn require_kind(item: &TrackedItem, kind: TrackingKind) -> Result<(), ValidationError> {
        if item.kind() == kind {
            Ok(())
        } else {
            Err(ValidationError::TrackingMismatch {
                expected: item.kind(),
                got: kind,
            })
        }
    }

    /// Add `delta` (possibly negative) to a quantitative day, floored at zero.
    ///
    /// # Errors
    ///
    /// As [`Tracker::log_day`]; a non-quantitative item is a mismatch.
    pub fn increment(&self, item_id: &str, day: DayKey, delta: i64) -> Result<Receipt<DailyRecord>, TallyError> {
        let item = self.live(item_id)?;
        Self::require_kind(&item, TrackingKind::Quantitative)?;
        let Progress::Quantitative { unit, goal, count } = Self::day_progress(&item, day) else {
            return Err(ValidationError::TrackingMismatch {
                expected: item.kind(),
                got: TrackingKind::Quantitative,
            }
            .into());
        };
        let next = (i64::from(count) + delta).clamp(0, i64::from(u32::MAX));
        let count = u32::try_from(next).unwrap_or(u32::MAX);
        self.log_day(
            item_id,
            day,
            DayUpdate::progress(Progress::Quantitative { unit, goal, count }),
        )
    }

    /// Set or reset a binary day's marker.
    ///
    /// # Errors
    ///
    /// As [`Tracker::log_day`].
    pub fn mark_binary(
        &self,
        item_id: &str,
        day: DayKey,
        marker: Option<BinaryMarker>,
    ) -> Result<Receipt<DailyRecord>, TallyError> {
        self.log_day(item_id, day, DayUpdate::progress(Progress::Binary { marker }))
    }

    fn timer_step(
        &self,
        item_id: &str,
        day: DayKey,
        step: TimerStep,
    ) -> Result<Receipt<DailyRecord>, TallyError> {
        let item = self.live(item_id)?;
        Self::require_kind(&item, TrackingKind::TimeBased)?;
        let now = self.now();
        let progress = Self::day_progress(&item, day);
        let Progress::TimeBased {
            target_seconds,
            mut elapsed_seconds,
            mut pause_count,
            mut started_at,
            mut stopped_at,
        } = progress.clone()
        else {
            return Err(ValidationError::TrackingMismatch {
                expected: item.kind(),
                got: TrackingKind::TimeBased,
            }
            .into());
        };

        let running = progress.timer_running();
        match (step, running) {
            (TimerStep::Start, false) => {
                started_at = Some(now);
                stopped_at = None;
            }
            (TimerStep::Pause | TimerStep::Stop, true) => {
                if let Some(start) = started_at {
                    let ran = (now - start).num_seconds().max(0);
                    elapsed_seconds = elapsed_seconds.saturating_add(u64::try_from(ran).unwrap_or(0));
                }
                if matches!(step, TimerStep::Pause) {
                    pause_count = pause_count.saturating_add(1);
                }
                stopped_at = Some(now);
            }
            _ => {
                let value = item
                    .records
                    .get(&day)
                    .cloned()
                    .unwrap_or_else(|| DailyRecord::new(progress, now, None));
                return Ok(Receipt {
                    value,
                    dispatch: Dispatch::Unchanged,
                });
            }
        }

        self.log_day(
            item_id,
            day,
            DayUpdate::progress(Progress::TimeBased {
                target_seconds,
                elapsed_seconds,
                pause_count,
                started_at,
                stopped_at,
            }),
        )
    }

    /// Start the day's timer. A running timer is left alone.
    ///
    /// # Errors
    ///
    /// As [`Tracker::log_day`]; a non-time-based item is a mismatch.
    pub fn start_timer(&self, item_id: &str, day: DayKey) -> Result<Receipt<DailyRecord>, TallyError> {
        self.timer_step(item_id, day, TimerStep::Start)
    }

    /// Bank elapsed time and count a pause. A stopped timer is left alone.
    ///
    /// # Errors
    ///
    /// As [`Tracker::start_timer`].
    pub fn pause_timer(&self, item_id: &str, day: DayKey) -> Result<Receipt<DailyRecord>, TallyError> {
        self.timer_step(item_id, day, TimerStep::Pause)
    }

    /// Bank elapsed time and stop. A stopped timer is left alone.
    ///
    /// # Errors
    ///
    /// As [`Tracker::start_timer`].
    pub fn stop_timer(&self, item_id: &str, day: DayKey) -> Result<Receipt<DailyRecord>, TallyError> {
        self.timer_step(item_id, day, TimerStep::Stop)
    }

    /// Reset a day to empty progress and mark it cleared. The record stays.
    ///
    /// Returns `None` when nothing was ever logged on that day.
    ///
    /// # Errors
    ///
    /// [`TallyError::NotFound`] or a storage error.
    pub fn clear_day(&self, item_id: &str, day: DayKey) -> Result<Receipt<Option<DailyRecord>>, TallyError> {
        let item = self.live(item_id)?;
        let Some(mut record) = item.records.get(&day).cloned() else {
            return Ok(Receipt {
                value: None,
                dispatch: Dispatch::Unchanged,
            });
        };
        let now = self.now();
        record.progress = item.tracking.empty_progress();
        record.note = None;
        record.mood = None;
        record.cleared_at = Some(now);
        let receipt = self.write_day(&item, day, record, now)?;
        Ok(Receipt {
            value: Some(receipt.value),
            dispatch: receipt.dispatch,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerStep {
    Start,
    Pause,
    Stop,
}
