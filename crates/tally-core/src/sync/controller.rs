//! The sync controller: owns the state machine and runs fetch/merge/publish.
//!
//! A cycle is:
//!
//! 1. check the auth capability; without it, fail with the store untouched;
//! 2. drain the outbox so queued local intent reaches the server first;
//! 3. fetch the remote snapshot and validate it at the boundary;
//! 4. inside the store's exclusive section, re-key items whose temp id the
//!    server replaced, then merge, persisting before publishing.
//!
//! Any failure moves to `Error` and leaves the previously published state
//! in place; confirmed server ids stay recorded in the outbox until a cycle
//! publishes them. Cycles are single-in-flight: a trigger arriving mid-cycle
//! waits for the running cycle and shares its result. A trigger from inside
//! the running cycle (a transition listener) returns
//! [`TriggerOutcome::Nested`] at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::{SyncEvent, SyncReport, SyncState};
use crate::clock::Clock;
use crate::error::TallyError;
use crate::flight::{Flight, SingleFlight};
use crate::gateway::{AuthCapability, RemoteGateway};
use crate::outbox::Outbox;
use crate::reconcile::{merge_with_pending, validate_remote};
use crate::store::{EntityStore, move_item};

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum spacing between throttled triggers.
    pub min_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::seconds(30),
        }
    }
}

/// How a trigger was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This call ran a cycle.
    Ran(SyncReport),
    /// A cycle was already running; this is its report.
    Joined(SyncReport),
    /// Skipped: the last attempt was too recent.
    Throttled { retry_after: Duration },
    /// Skipped: requested from inside the running cycle, which covers it.
    Nested,
}

impl TriggerOutcome {
    #[must_use]
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Ran(report) | Self::Joined(report) => Some(report),
            Self::Throttled { .. } | Self::Nested => None,
        }
    }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug)]
struct Status {
    state: SyncState,
    last_success: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

pub struct SyncController {
    store: Arc<EntityStore>,
    outbox: Arc<Outbox>,
    gateway: Arc<dyn RemoteGateway>,
    auth: Arc<dyn AuthCapability>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    status: Mutex<Status>,
    cycle: SingleFlight<Result<SyncReport, TallyError>>,
    listeners: Mutex<Vec<Listener>>,
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("status", &*self.status())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncController {
    #[must_use]
    pub fn new(
        store: Arc<EntityStore>,
        outbox: Arc<Outbox>,
        gateway: Arc<dyn RemoteGateway>,
        auth: Arc<dyn AuthCapability>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            outbox,
            gateway,
            auth,
            clock,
            settings,
            status: Mutex::new(Status {
                state: SyncState::Idle,
                last_success: None,
                last_attempt: None,
            }),
            cycle: SingleFlight::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Seed the last successful sync time, e.g. from a previous process.
    #[must_use]
    pub fn with_last_success(self, at: Option<DateTime<Utc>>) -> Self {
        self.status().last_success = at;
        self
    }

    /// Seed the last attempt time so the trigger throttle spans processes.
    #[must_use]
    pub fn with_last_attempt(self, at: Option<DateTime<Utc>>) -> Self {
        self.status().last_attempt = at;
        self
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get_sync_state(&self) -> SyncState {
        self.status().state.clone()
    }

    #[must_use]
    pub fn get_last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.status().last_success
    }

    #[must_use]
    pub fn get_last_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.status().last_attempt
    }

    #[must_use]
    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Register a callback for every state transition.
    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Whether a post-mutation trigger should fire.
    #[must_use]
    pub fn can_attempt(&self) -> bool {
        self.auth.ready()
    }

    /// Run a cycle unless the last attempt is more recent than
    /// `min_interval`. Joins a cycle already in flight.
    ///
    /// # Errors
    ///
    /// The cycle's error; the sync state is `Error` afterwards.
    pub fn trigger_sync(&self) -> Result<TriggerOutcome, TallyError> {
        if self.cycle.led_by_current_thread() {
            debug!("sync requested from inside the running cycle");
            return Ok(TriggerOutcome::Nested);
        }
        if !self.cycle.in_flight() {
            let now = self.clock.now();
            let last = self.status().last_attempt;
            if let Some(last) = last {
                let next = last + self.settings.min_interval;
                if now < next {
                    debug!(retry_after_ms = (next - now).num_milliseconds(), "sync throttled");
                    return Ok(TriggerOutcome::Throttled {
                        retry_after: next - now,
                    });
                }
            }
        }
        self.force_sync()
    }

    /// Run a cycle regardless of throttling. Joins a cycle already in flight.
    ///
    /// # Errors
    ///
    /// The cycle's error; the sync state is `Error` afterwards.
    pub fn force_sync(&self) -> Result<TriggerOutcome, TallyError> {
        if self.cycle.led_by_current_thread() {
            debug!("sync requested from inside the running cycle");
            return Ok(TriggerOutcome::Nested);
        }
        match self.cycle.run(|| self.run_cycle()) {
            Flight::Led(result) => result.map(TriggerOutcome::Ran),
            Flight::Joined(result) => result.map(TriggerOutcome::Joined),
        }
    }

    /// Connectivity came back: sync now.
    ///
    /// # Errors
    ///
    /// The cycle's error.
    pub fn on_reconnected(&self) -> Result<TriggerOutcome, TallyError> {
        info!("reconnected; syncing");
        self.force_sync()
    }

    /// Return a settled `Success`/`Error` indicator to `Idle`.
    pub fn acknowledge(&self) {
        let state = self.get_sync_state();
        if matches!(state, SyncState::Success | SyncState::Error(_)) {
            self.transition(SyncState::Idle);
        }
    }

    fn transition(&self, to: SyncState) {
        let at = self.clock.now();
        let event = {
            let mut status = self.status();
            if let Err(err) = status.state.can_transition_to(&to) {
                error!(error = %err, "refusing sync state transition");
                return;
            }
            let from = std::mem::replace(&mut status.state, to.clone());
            if matches!(to, SyncState::Syncing) {
                status.last_attempt = Some(at);
            }
            if matches!(to, SyncState::Success) {
                status.last_success = Some(at);
            }
            SyncEvent { from, to, at }
        };
        debug!(from = event.from.label(), to = event.to.label(), "sync state");
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn fail(&self, err: TallyError, message: String) -> Result<SyncReport, TallyError> {
        warn!(error = %err, "sync cycle failed");
        self.transition(SyncState::Error(message));
        Err(err)
    }

    #[instrument(skip_all)]
    fn run_cycle(&self) -> Result<SyncReport, TallyError> {
        if !matches!(self.get_sync_state(), SyncState::Idle) {
            self.transition(SyncState::Idle);
        }
        self.transition(SyncState::Syncing);
        let started_at = self.clock.now();

        if !self.auth.is_actor_authenticated() {
            return self.fail(
                TallyError::Auth("actor is not signed in".into()),
                "unauthenticated".into(),
            );
        }
        if !self.auth.can_sync() {
            return self.fail(TallyError::Network("offline".into()), "offline".into());
        }

        let drain = self.outbox.drain(self.gateway.as_ref()).into_inner();
        if let Some(err) = drain.storage_error.clone() {
            let message = err.to_string();
            return self.fail(err, message);
        }

        let remote = match self
            .gateway
            .list_items()
            .map_err(TallyError::from)
            .and_then(validate_remote)
        {
            Ok(remote) => remote,
            Err(err) => {
                let message = err.to_string();
                return self.fail(err, message);
            }
        };

        let outbox = &self.outbox;
        let remaps = outbox.unapplied_remaps();
        let stats = self.store.commit(|items| {
            for remap in &remaps {
                if move_item(items, &remap.from, &remap.to) {
                    debug!(from = %remap.from, to = %remap.to, "item re-keyed");
                }
            }
            let pending = outbox.pending_creates();
            let outcome = merge_with_pending(items, &remote, &pending);
            *items = outcome.snapshot;
            Ok(outcome.stats)
        });
        let stats = match stats {
            Ok(stats) => stats,
            Err(err) => {
                let message = err.to_string();
                return self.fail(err, message);
            }
        };
        if let Err(err) = outbox.settle_remaps(&remaps) {
            // Re-keying is idempotent; the next cycle retries the cleanup.
            warn!(error = %err, "could not clear applied remaps");
        }

        let report = SyncReport::new(started_at, self.clock.now(), &drain, stats);
        self.transition(SyncState::Success);
        info!(
            delivered = report.delivered,
            retained = report.retained,
            dropped = report.dropped,
            adopted = report.merge.adopted,
            days_local = report.merge.days_local,
            "sync complete"
        );
        Ok(report)
    }
}
