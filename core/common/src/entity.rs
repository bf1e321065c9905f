//! The contract a domain record satisfies to take part in sync.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::types::{EntityId, Timestamp};

/// A synchronizable record.
///
/// Only the sync-relevant attributes are exposed here; the domain payload is
/// carried opaquely through serde.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Tag routing queue entries and handlers to this type. Also the
    /// collection name on the remote API (e.g. `"clients"`).
    const TYPE_ID: &'static str;

    /// Tag of the owning parent type, if records of this type belong to one.
    const PARENT_TYPE_ID: Option<&'static str> = None;

    /// Stable identifier.
    fn id(&self) -> &EntityId;

    /// Identifier of the owning parent record.
    fn parent_id(&self) -> Option<&EntityId> {
        None
    }

    /// Logical time of the last mutation to the live fields.
    fn updated_at(&self) -> Timestamp;

    /// Stamp a mutation.
    fn set_updated_at(&mut self, at: Timestamp);

    /// Soft-deletion time; `Some` marks the record terminal.
    fn deleted_at(&self) -> Option<Timestamp>;

    /// Mark the record soft-deleted.
    fn set_deleted_at(&mut self, at: Timestamp);

    /// Whether the record is soft-deleted.
    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    /// `max(updated_at, deleted_at)`, the time the record last changed.
    fn sync_timestamp(&self) -> Timestamp {
        match self.deleted_at() {
            Some(deleted_at) => deleted_at.max(self.updated_at()),
            None => self.updated_at(),
        }
    }
}
