//! Local store trait definition.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

use fieldbook_common::{Entity, EntityId, Result};

/// Stream of observed values for a single record.
pub type EntityStream<E> = Pin<Box<dyn Stream<Item = Result<Option<E>>> + Send>>;

/// Stream of observed listings for a scope.
pub type ScopeStream<E> = Pin<Box<dyn Stream<Item = Result<Vec<E>>> + Send>>;

/// Per-entity-type local table.
///
/// Implementations must bump the revision published by [`changes`] after
/// every successful `save` or `delete`.
///
/// [`changes`]: LocalStore::changes
#[async_trait]
pub trait LocalStore<E: Entity>: Send + Sync {
    /// Backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Get a record by id.
    async fn get(&self, id: &EntityId) -> Result<Option<E>>;

    /// List records, optionally only those owned by `scope`.
    async fn get_all(&self, scope: Option<&EntityId>) -> Result<Vec<E>>;

    /// Insert or replace a record.
    async fn save(&self, entity: &E) -> Result<()>;

    /// Remove a record. Removing a missing record is not an error.
    async fn delete(&self, id: &EntityId) -> Result<()>;

    /// Revision counter bumped on every change to this table.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Observe one record.
///
/// Emits the current value immediately, then again after every change to the
/// table. Absent and soft-deleted records are reported as `None`.
pub fn observe_entity<E: Entity>(store: Arc<dyn LocalStore<E>>, id: EntityId) -> EntityStream<E> {
    let mut changes = store.changes();
    changes.mark_unchanged();

    Box::pin(stream::unfold(
        (store, changes, id, true),
        |(store, mut changes, id, first)| async move {
            if !first && changes.changed().await.is_err() {
                return None;
            }
            let item = store
                .get(&id)
                .await
                .map(|entity| entity.filter(|e| !e.is_deleted()));
            Some((item, (store, changes, id, false)))
        },
    ))
}

/// Observe the live records of a scope (or the whole table).
pub fn observe_scope<E: Entity>(
    store: Arc<dyn LocalStore<E>>,
    scope: Option<EntityId>,
) -> ScopeStream<E> {
    let mut changes = store.changes();
    changes.mark_unchanged();

    Box::pin(stream::unfold(
        (store, changes, scope, true),
        |(store, mut changes, scope, first)| async move {
            if !first && changes.changed().await.is_err() {
                return None;
            }
            let items = store.get_all(scope.as_ref()).await.map(|entities| {
                entities
                    .into_iter()
                    .filter(|e| !e.is_deleted())
                    .collect::<Vec<_>>()
            });
            Some((items, (store, changes, scope, false)))
        },
    ))
}
