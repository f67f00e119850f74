//! Wiring for one CLI invocation: config, store, outbox, remote, controller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::clock::{Clock, SystemClock};
use tally_core::config::{EffectiveConfig, TALLY_DIR, resolve_config};
use tally_core::gateway::AuthCapability;
use tally_core::outbox::Outbox;
use tally_core::persist::{Collection, JsonFile};
use tally_core::store::EntityStore;
use tally_core::sync::{SyncController, SyncState};
use tally_core::tracker::Tracker;
use tracing::debug;

use crate::output::OutputMode;
use crate::remote::DirGateway;

pub const ITEMS_FILE: &str = "items.json";
pub const OUTBOX_FILE: &str = "outbox.json";
pub const SYNC_FILE: &str = "sync.json";

/// Owner recorded when no actor is configured.
const ANONYMOUS: &str = "anonymous";

/// Global flags that shape a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub json: bool,
    pub actor: Option<String>,
    pub offline: bool,
}

/// Sync bookkeeping carried between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMarker {
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Signed in when an actor is known; able to sync when the remote directory
/// is configured, present, and `--offline` was not given.
#[derive(Debug)]
pub struct CliAuth {
    actor: Option<String>,
    remote_dir: Option<PathBuf>,
    offline: bool,
}

impl AuthCapability for CliAuth {
    fn is_actor_authenticated(&self) -> bool {
        self.actor.as_deref().is_some_and(|a| !a.trim().is_empty())
    }

    fn can_sync(&self) -> bool {
        !self.offline && self.remote_dir.as_deref().is_some_and(Path::is_dir)
    }
}

/// Walk up from `start` to the nearest directory holding `.tally/`.
#[must_use]
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(TALLY_DIR).is_dir())
        .map(Path::to_path_buf)
}

fn resolve_actor(flag: Option<&str>, config: &EffectiveConfig) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| std::env::var("TALLY_ACTOR").ok())
        .or_else(|| config.user.actor.clone())
        .filter(|actor| !actor.trim().is_empty())
}

pub struct Session {
    pub root: PathBuf,
    pub output: OutputMode,
    pub tracker: Tracker,
    pub controller: Arc<SyncController>,
    auth: Arc<CliAuth>,
    marker: JsonFile<SyncMarker>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.root)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open the workspace containing `cwd`.
    ///
    /// # Errors
    ///
    /// Fails outside a tally workspace, on a malformed config, or when the
    /// persisted collections cannot be read.
    pub fn open(cwd: &Path, options: &SessionOptions) -> Result<Self> {
        let Some(root) = find_root(cwd) else {
            bail!("not inside a tally workspace (no {TALLY_DIR}/ found); run `tally init` first");
        };
        let config = resolve_config(&root, options.json)?;
        let output = OutputMode::from_resolved(&config.resolved_output);
        let data = root.join(TALLY_DIR);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let remote_dir = config
            .project
            .sync
            .remote_dir
            .as_ref()
            .map(|dir| if dir.is_absolute() { dir.clone() } else { root.join(dir) });
        let actor = resolve_actor(options.actor.as_deref(), &config);
        let auth = Arc::new(CliAuth {
            actor: actor.clone(),
            remote_dir: remote_dir.clone(),
            offline: options.offline,
        });
        let gateway = Arc::new(DirGateway::new(
            remote_dir.unwrap_or_else(|| data.join("no-remote")),
            Arc::clone(&clock),
        ));

        let store = EntityStore::open(JsonFile::new(data.join(ITEMS_FILE)))
            .with_context(|| format!("failed to open {}", data.join(ITEMS_FILE).display()))?;
        let outbox = Outbox::open(JsonFile::new(data.join(OUTBOX_FILE)), Arc::clone(&clock))
            .with_context(|| format!("failed to open {}", data.join(OUTBOX_FILE).display()))?;

        let marker = JsonFile::new(data.join(SYNC_FILE));
        let previous: SyncMarker = marker.load()?.unwrap_or_default();

        let tracker = Tracker::new(
            Arc::new(store),
            Arc::new(outbox),
            gateway,
            auth.clone(),
            clock,
            actor.unwrap_or_else(|| ANONYMOUS.to_string()),
        )
        .with_limits(config.project.limits);
        let controller = Arc::new(
            tracker
                .controller(config.project.sync.settings())
                .with_last_success(previous.last_success)
                .with_last_attempt(previous.last_attempt),
        );
        let tracker = tracker.with_auto_sync(Arc::clone(&controller));
        debug!(root = %root.display(), "session opened");

        Ok(Self {
            root,
            output,
            tracker,
            controller,
            auth,
            marker,
        })
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.auth.is_actor_authenticated()
    }

    #[must_use]
    pub fn can_sync(&self) -> bool {
        self.auth.can_sync()
    }

    #[must_use]
    pub fn remote_dir(&self) -> Option<&Path> {
        self.auth.remote_dir.as_deref()
    }

    /// The marker as last saved by any invocation.
    ///
    /// # Errors
    ///
    /// Fails when `sync.json` cannot be decoded.
    pub fn load_marker(&self) -> Result<SyncMarker> {
        Ok(self.marker.load()?.unwrap_or_default())
    }

    /// Persist this invocation's sync bookkeeping, if a cycle ran.
    ///
    /// # Errors
    ///
    /// Fails when `sync.json` cannot be written.
    pub fn save_marker(&self) -> Result<()> {
        let previous = self.load_marker()?;
        let last_error = match self.controller.get_sync_state() {
            SyncState::Error(message) => Some(message),
            SyncState::Success => None,
            SyncState::Idle | SyncState::Syncing => previous.last_error.clone(),
        };
        let next = SyncMarker {
            last_attempt: self.controller.get_last_attempt_time(),
            last_success: self.controller.get_last_sync_time(),
            last_error,
        };
        if next != previous {
            self.marker.replace(&next)?;
        }
        Ok(())
    }
}
