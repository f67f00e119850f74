use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::day::DayKey;
use super::item::{ItemPatch, TrackedItem};
use super::record::DailyRecord;

/// A local change the server has not confirmed yet.
///
/// Each variant carries a snapshot of the payload taken when the mutation was
/// committed locally, so later local edits never alter what gets delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateItem {
        item: TrackedItem,
    },
    UpdateItem {
        id: String,
        patch: ItemPatch,
    },
    DeleteItem {
        id: String,
        soft: bool,
    },
    UpsertDailyRecord {
        item_id: String,
        day: DayKey,
        record: DailyRecord,
    },
}

impl Mutation {
    /// Id of the item this mutation targets.
    #[must_use]
    pub fn target_id(&self) -> &str {
        match self {
            Self::CreateItem { item } => &item.id,
            Self::UpdateItem { id, .. } | Self::DeleteItem { id, .. } => id,
            Self::UpsertDailyRecord { item_id, .. } => item_id,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CreateItem { .. } => "create_item",
            Self::UpdateItem { .. } => "update_item",
            Self::DeleteItem { .. } => "delete_item",
            Self::UpsertDailyRecord { .. } => "upsert_daily_record",
        }
    }

    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(self, Self::CreateItem { .. })
    }

    /// Point the mutation at `to` if it currently targets `from`.
    ///
    /// Returns `true` when the target changed.
    pub fn retarget(&mut self, from: &str, to: &str) -> bool {
        let slot = match self {
            Self::CreateItem { item } => &mut item.id,
            Self::UpdateItem { id, .. } | Self::DeleteItem { id, .. } => id,
            Self::UpsertDailyRecord { item_id, .. } => item_id,
        };
        if slot.as_str() == from {
            *slot = to.to_string();
            true
        } else {
            false
        }
    }
}

/// One queued mutation with its position in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic enqueue sequence; FIFO order is ascending `seq`.
    pub seq: u64,
    pub queued_at: DateTime<Utc>,
    pub mutation: Mutation,
}
