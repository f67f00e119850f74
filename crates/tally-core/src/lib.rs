//! tally-core library.
//!
//! Local-first habit tracking: every local mutation is committed to the
//! [`store::EntityStore`] before any network exchange, unconfirmed mutations
//! wait in the [`outbox::Outbox`], and the [`sync::SyncController`] merges the
//! server's snapshot back in with [`reconcile`].

pub mod clock;
pub mod config;
pub mod error;
pub mod flight;
pub mod gateway;
pub mod lock;
pub mod model;
pub mod outbox;
pub mod persist;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod sync;
pub mod tracker;

/// # Conventions
///
/// - **Errors**: Library APIs return [`error::TallyError`]; config loading
///   uses `anyhow::Result` with file context.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
pub use error::{ErrorCode, TallyError, ValidationError};
