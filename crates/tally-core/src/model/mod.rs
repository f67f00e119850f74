//! Record model: tracked items, daily records, and mutation descriptors.

pub mod day;
pub mod id;
pub mod item;
pub mod mutation;
pub mod record;

use std::collections::BTreeMap;

pub use day::DayKey;
pub use item::{ItemDraft, ItemPatch, Schedule, TrackedItem, Tracking, TrackingKind};
pub use mutation::{Mutation, OutboxEntry};
pub use record::{BinaryMarker, DailyRecord, DayUpdate, Mood, Progress, Symbol};

/// Full local or remote state: every tracked item keyed by id.
pub type Snapshot = BTreeMap<String, TrackedItem>;

/// Build a [`Snapshot`] from a list such as a `listItems` response.
///
/// Later duplicates of the same id replace earlier ones.
#[must_use]
pub fn snapshot_from(items: impl IntoIterator<Item = TrackedItem>) -> Snapshot {
    items.into_iter().map(|item| (item.id.clone(), item)).collect()
}
