use std::fmt;

use crate::model::TrackingKind;

/// Machine-readable error codes for scripts and presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ItemNotFound,
    InvalidTitle,
    DuplicateTitle,
    InvalidDayKey,
    TrackingMismatch,
    NoteTooLong,
    InvalidSchedule,
    InvalidSyncTransition,
    NetworkUnavailable,
    GatewayTimeout,
    Unauthenticated,
    RemoteConflict,
    MalformedRemotePayload,
    StorageWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::InvalidTitle => "E2002",
            Self::DuplicateTitle => "E2003",
            Self::InvalidDayKey => "E2004",
            Self::TrackingMismatch => "E2005",
            Self::NoteTooLong => "E2006",
            Self::InvalidSchedule => "E2008",
            Self::InvalidSyncTransition => "E2007",
            Self::NetworkUnavailable => "E4001",
            Self::GatewayTimeout => "E4002",
            Self::Unauthenticated => "E4003",
            Self::RemoteConflict => "E4004",
            Self::MalformedRemotePayload => "E4005",
            Self::StorageWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Tally directory not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Tracked item not found",
            Self::InvalidTitle => "Invalid title",
            Self::DuplicateTitle => "Duplicate title",
            Self::InvalidDayKey => "Invalid day key",
            Self::TrackingMismatch => "Progress does not match tracking kind",
            Self::NoteTooLong => "Note too long",
            Self::InvalidSchedule => "Invalid schedule",
            Self::InvalidSyncTransition => "Invalid sync state transition",
            Self::NetworkUnavailable => "Remote unreachable",
            Self::GatewayTimeout => "Remote timed out",
            Self::Unauthenticated => "Not authenticated",
            Self::RemoteConflict => "Remote rejected mutation",
            Self::MalformedRemotePayload => "Malformed remote payload",
            Self::StorageWriteFailed => "Local storage write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to users and scripts.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `tally init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .tally/config.toml and retry."),
            Self::ItemNotFound | Self::InvalidSyncTransition => None,
            Self::InvalidTitle => Some("Use a title within the configured length limits."),
            Self::DuplicateTitle => Some("Pick a title not used by another active item."),
            Self::InvalidDayKey => Some("Use the YYYY-MM-DD format."),
            Self::TrackingMismatch => {
                Some("Log progress of the same kind the item was created with.")
            }
            Self::NoteTooLong => Some("Shorten the note below the configured limit."),
            Self::InvalidSchedule => Some("Times per week must be 1..=7; weekdays must not be empty."),
            Self::NetworkUnavailable | Self::GatewayTimeout => {
                Some("The change is queued and will be delivered on the next sync.")
            }
            Self::Unauthenticated => Some("Configure an actor and remote, then sync again."),
            Self::RemoteConflict => Some("The server copy wins; re-apply the change if needed."),
            Self::MalformedRemotePayload => Some("Local state was kept. Report the remote fault."),
            Self::StorageWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `tally` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Input rejected before any write happens. Never queued, never sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("title must be {min}..={max} characters, got {len}")]
    TitleLength { len: usize, min: usize, max: usize },

    #[error("an active item is already titled '{0}'")]
    DuplicateTitle(String),

    #[error("note must be at most {max} characters, got {len}")]
    NoteTooLong { len: usize, max: usize },

    #[error("invalid day key '{0}': expected YYYY-MM-DD")]
    InvalidDay(String),

    #[error("{got} progress cannot be logged on a {expected} item")]
    TrackingMismatch {
        expected: TrackingKind,
        got: TrackingKind,
    },

    #[error("tracking kind cannot change from {from} to {to}")]
    KindChange { from: TrackingKind, to: TrackingKind },

    #[error("schedule needs {0}")]
    InvalidSchedule(&'static str),
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TitleLength { .. } => ErrorCode::InvalidTitle,
            Self::DuplicateTitle(_) => ErrorCode::DuplicateTitle,
            Self::NoteTooLong { .. } => ErrorCode::NoteTooLong,
            Self::InvalidDay(_) => ErrorCode::InvalidDayKey,
            Self::TrackingMismatch { .. } | Self::KindChange { .. } => ErrorCode::TrackingMismatch,
            Self::InvalidSchedule(_) => ErrorCode::InvalidSchedule,
        }
    }
}

/// Crate-wide error taxonomy.
///
/// Variants are cloneable so a coalesced caller can receive the same outcome
/// as the caller that actually ran the work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TallyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("storage write failed: {0}")]
    Storage(String),

    #[error("lock contention: {0}")]
    LockContention(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("remote timed out: {0}")]
    Timeout(String),

    #[error("not authenticated: {0}")]
    Auth(String),

    #[error("remote rejected mutation: {0}")]
    Conflict(String),

    #[error("malformed remote payload: {0}")]
    MalformedPayload(String),
}

impl TallyError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(err) => err.code(),
            Self::NotFound(_) => ErrorCode::ItemNotFound,
            Self::Storage(_) => ErrorCode::StorageWriteFailed,
            Self::LockContention(_) => ErrorCode::LockContention,
            Self::Network(_) => ErrorCode::NetworkUnavailable,
            Self::Timeout(_) => ErrorCode::GatewayTimeout,
            Self::Auth(_) => ErrorCode::Unauthenticated,
            Self::Conflict(_) => ErrorCode::RemoteConflict,
            Self::MalformedPayload(_) => ErrorCode::MalformedRemotePayload,
        }
    }

    /// Whether re-invoking the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::LockContention(_))
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
