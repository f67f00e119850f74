//! Remote Gateway contract and the authentication capability.
//!
//! The gateway is the only path to the authoritative server copy. Transport,
//! retries and backoff live behind it; the core only sees each call's result
//! and the gateway's own retryable/terminal classification of failures.

pub mod memory;

use crate::error::TallyError;
use crate::model::{DailyRecord, DayKey, ItemPatch, Mutation, TrackedItem};

/// A gateway call failure, pre-classified by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("no response within timeout: {0}")]
    Timeout(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rejected by server validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Transport failures may succeed on a later attempt; everything else is
    /// final for the mutation that caused it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<GatewayError> for TallyError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(msg) => Self::Network(msg),
            GatewayError::Timeout(msg) => Self::Timeout(msg),
            GatewayError::Unauthorized(msg) => Self::Auth(msg),
            GatewayError::Validation(msg) | GatewayError::Conflict(msg) => Self::Conflict(msg),
            GatewayError::Malformed(msg) => Self::MalformedPayload(msg),
        }
    }
}

/// Network boundary to the authoritative copy.
///
/// Calls are logically sequential within one sync cycle. Timeouts are the
/// implementation's job and surface as [`GatewayError::Timeout`].
pub trait RemoteGateway: Send + Sync {
    /// Every non-deleted item with its records embedded.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`]; the caller keeps its previous state.
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError>;

    /// Create an item. Idempotent by the client's temp id; the returned item
    /// carries the server-assigned id.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError>;

    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError>;

    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError>;

    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn upsert_daily_record(
        &self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError>;
}

impl<G: RemoteGateway + ?Sized> RemoteGateway for std::sync::Arc<G> {
    fn list_items(&self) -> Result<Vec<TrackedItem>, GatewayError> {
        (**self).list_items()
    }

    fn create_item(&self, item: &TrackedItem) -> Result<TrackedItem, GatewayError> {
        (**self).create_item(item)
    }

    fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<TrackedItem, GatewayError> {
        (**self).update_item(id, patch)
    }

    fn delete_item(&self, id: &str, soft: bool) -> Result<(), GatewayError> {
        (**self).delete_item(id, soft)
    }

    fn upsert_daily_record(
        &self,
        item_id: &str,
        day: DayKey,
        record: &DailyRecord,
    ) -> Result<DailyRecord, GatewayError> {
        (**self).upsert_daily_record(item_id, day, record)
    }
}

/// What the host knows about the actor and the network.
pub trait AuthCapability: Send + Sync {
    fn is_actor_authenticated(&self) -> bool;

    /// Whether outbound calls may be made right now.
    fn can_sync(&self) -> bool;

    /// Both checks at once: the precondition for any gateway attempt.
    fn ready(&self) -> bool {
        self.is_actor_authenticated() && self.can_sync()
    }
}

impl<A: AuthCapability + ?Sized> AuthCapability for std::sync::Arc<A> {
    fn is_actor_authenticated(&self) -> bool {
        (**self).is_actor_authenticated()
    }

    fn can_sync(&self) -> bool {
        (**self).can_sync()
    }
}

/// Fixed capability, for tests and single-shot CLI runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAuth {
    pub authenticated: bool,
    pub online: bool,
}

impl StaticAuth {
    #[must_use]
    pub const fn online() -> Self {
        Self {
            authenticated: true,
            online: true,
        }
    }

    #[must_use]
    pub const fn offline() -> Self {
        Self {
            authenticated: true,
            online: false,
        }
    }

    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            authenticated: false,
            online: true,
        }
    }
}

impl AuthCapability for StaticAuth {
    fn is_actor_authenticated(&self) -> bool {
        self.authenticated
    }

    fn can_sync(&self) -> bool {
        self.online
    }
}

/// Result of delivering one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The server's copy of a newly created item, possibly under a new id.
    Created(TrackedItem),
    Updated(TrackedItem),
    Deleted,
    RecordStored(DailyRecord),
}

/// Send one mutation through the gateway.
///
/// # Errors
///
/// The gateway's classified error.
pub fn deliver(gateway: &dyn RemoteGateway, mutation: &Mutation) -> Result<Delivery, GatewayError> {
    match mutation {
        Mutation::CreateItem { item } => gateway.create_item(item).map(Delivery::Created),
        Mutation::UpdateItem { id, patch } => gateway.update_item(id, patch).map(Delivery::Updated),
        Mutation::DeleteItem { id, soft } => gateway.delete_item(id, *soft).map(|()| Delivery::Deleted),
        Mutation::UpsertDailyRecord {
            item_id,
            day,
            record,
        } => gateway
            .upsert_daily_record(item_id, *day, record)
            .map(Delivery::RecordStored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(GatewayError::Network("down".into()).is_retryable());
        assert!(GatewayError::Timeout("slow".into()).is_retryable());
        assert!(!GatewayError::Unauthorized("x".into()).is_retryable());
        assert!(!GatewayError::Validation("x".into()).is_retryable());
        assert!(!GatewayError::Conflict("x".into()).is_retryable());
        assert!(!GatewayError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn gateway_errors_map_into_taxonomy() {
        assert_eq!(
            TallyError::from(GatewayError::Unauthorized("expired".into())),
            TallyError::Auth("expired".into())
        );
        assert_eq!(
            TallyError::from(GatewayError::Validation("title".into())),
            TallyError::Conflict("title".into())
        );
        assert!(TallyError::from(GatewayError::Timeout("t".into())).is_retryable());
    }

    #[test]
    fn static_auth_requires_both_flags() {
        assert!(StaticAuth::online().ready());
        assert!(!StaticAuth::offline().ready());
        assert!(!StaticAuth::signed_out().ready());
    }
}
