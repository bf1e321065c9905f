//! Remote API trait definition.

use async_trait::async_trait;

use fieldbook_common::{DeleteOutcome, Entity, EntityId, Result, Timestamp, UpsertOutcome};

/// One server-side change returned by a "modified since" query.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange<E> {
    /// The record was created or edited.
    Updated(E),
    /// The record was soft-deleted.
    Deleted { id: EntityId, deleted_at: Timestamp },
}

impl<E: Entity> RemoteChange<E> {
    /// Classify a record as returned by the server.
    pub fn from_entity(entity: E) -> Self {
        match entity.deleted_at() {
            Some(deleted_at) => RemoteChange::Deleted {
                id: entity.id().clone(),
                deleted_at,
            },
            None => RemoteChange::Updated(entity),
        }
    }

    /// Id of the changed record.
    pub fn id(&self) -> &EntityId {
        match self {
            RemoteChange::Updated(entity) => entity.id(),
            RemoteChange::Deleted { id, .. } => id,
        }
    }
}

/// Remote API for one entity type.
///
/// Failures are classified through [`fieldbook_common::Error`]: `Offline`
/// when the server cannot be reached, `Rejected` when it answers with an
/// error status, `Unexpected` for anything else.
#[async_trait]
pub trait RemoteApi<E: Entity>: Send + Sync {
    /// Backend name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Everything changed at or after `since`, optionally within a parent scope.
    async fn modified_since(
        &self,
        scope: Option<&EntityId>,
        since: Timestamp,
    ) -> Result<Vec<RemoteChange<E>>>;

    /// Push a full record.
    async fn upsert(&self, entity: &E) -> Result<UpsertOutcome<E>>;

    /// Push a deletion.
    async fn delete(&self, id: &EntityId, deleted_at: Timestamp) -> Result<DeleteOutcome<E>>;
}
