//! Entity sync handlers: how one entity type is pushed and written back.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fieldbook_common::{DeleteOutcome, Entity, EntityId, Error, Result, Timestamp, UpsertOutcome};
use fieldbook_remote::RemoteApi;
use fieldbook_storage::{observe_entity, EntityStream, LocalStore};

use crate::cascade::Cascade;
use crate::queue::{OperationType, SyncOperation};

/// Outcome of executing one queued operation.
#[derive(Debug)]
pub enum OperationResult {
    /// Applied remotely; remove from the queue.
    Success,
    /// The record vanished locally after being queued; discard.
    EntityNotFound,
    /// Leave queued and stop the drain.
    Failure(Error),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success)
    }
}

/// Type-erased handler the engine dispatches to by entity type tag.
///
/// Failures are returned as [`OperationResult::Failure`], never propagated.
#[async_trait]
pub trait EntitySyncHandler: Send + Sync {
    /// Tag routing queue entries to this handler.
    fn entity_type_id(&self) -> &str;

    async fn execute(&self, operation: &SyncOperation) -> OperationResult;
}

/// Per-type contract the push algorithms are written against.
///
/// Every implementor is an [`EntitySyncHandler`].
#[async_trait]
pub trait EntitySync: Send + Sync {
    type Entity: Entity;

    /// Observe the local copy; `None` if absent or deleted.
    fn entity_stream(&self, id: &EntityId) -> EntityStream<Self::Entity>;

    /// Lock shared with local mutations, held around write-backs.
    fn write_lock(&self) -> &Mutex<()>;

    async fn save_entity_to_api(
        &self,
        entity: &Self::Entity,
    ) -> Result<UpsertOutcome<Self::Entity>>;

    async fn delete_entity_from_api(
        &self,
        id: &EntityId,
        deleted_at: Timestamp,
    ) -> Result<DeleteOutcome<Self::Entity>>;

    /// Write an authoritative copy back to local storage.
    async fn save_entity_to_db(&self, entity: &Self::Entity) -> Result<()>;
}

#[async_trait]
impl<T: EntitySync> EntitySyncHandler for T {
    fn entity_type_id(&self) -> &str {
        type_id::<T>()
    }

    async fn execute(&self, operation: &SyncOperation) -> OperationResult {
        let result = match operation.operation {
            OperationType::Upsert => push_upsert(self, &operation.entity_id).await,
            OperationType::Delete => {
                push_delete(self, &operation.entity_id, operation.stamped_at).await
            }
        };
        result.unwrap_or_else(OperationResult::Failure)
    }
}

fn type_id<T: EntitySync + ?Sized>() -> &'static str {
    <T::Entity as Entity>::TYPE_ID
}

async fn current_local<T: EntitySync + ?Sized>(
    handler: &T,
    id: &EntityId,
) -> Result<Option<T::Entity>> {
    match handler.entity_stream(id).next().await {
        Some(item) => item,
        None => Ok(None),
    }
}

async fn push_upsert<T: EntitySync + ?Sized>(handler: &T, id: &EntityId) -> Result<OperationResult> {
    let Some(local) = current_local(handler, id).await? else {
        debug!("{}/{} is gone locally, discarding upsert", type_id::<T>(), id);
        return Ok(OperationResult::EntityNotFound);
    };

    match handler.save_entity_to_api(&local).await? {
        UpsertOutcome::Accepted => Ok(OperationResult::Success),
        UpsertOutcome::RejectedWithCurrent(current) => {
            info!(
                "Server kept a fresher {}/{} (updated {})",
                type_id::<T>(),
                id,
                current.updated_at()
            );
            // A local edit made while the push was in flight has its own
            // queued upsert and must not be overwritten here.
            let _writes = handler.write_lock().lock().await;
            match current_local(handler, id).await? {
                Some(now) if now.updated_at() <= local.updated_at() => {
                    handler.save_entity_to_db(&current).await?;
                }
                Some(_) => debug!("{}/{} changed locally during push", type_id::<T>(), id),
                None if current.is_deleted() => handler.save_entity_to_db(&current).await?,
                None => debug!("{}/{} deleted locally during push", type_id::<T>(), id),
            }
            Ok(OperationResult::Success)
        }
    }
}

async fn push_delete<T: EntitySync + ?Sized>(
    handler: &T,
    id: &EntityId,
    deleted_at: Timestamp,
) -> Result<OperationResult> {
    match handler.delete_entity_from_api(id, deleted_at).await? {
        DeleteOutcome::Accepted | DeleteOutcome::AlreadyDeleted => Ok(OperationResult::Success),
        DeleteOutcome::RejectedWithCurrent(current) => {
            info!(
                "Server kept {}/{}: edited at {} after delete at {}",
                type_id::<T>(),
                id,
                current.updated_at(),
                deleted_at
            );
            handler.save_entity_to_db(&current).await?;
            Ok(OperationResult::Success)
        }
    }
}

/// Handler for one record type backed by a local store and a remote API.
pub struct RecordSync<E: Entity> {
    store: Arc<dyn LocalStore<E>>,
    remote: Arc<dyn RemoteApi<E>>,
    cascade: Arc<Cascade>,
}

impl<E: Entity> RecordSync<E> {
    pub fn new(
        store: Arc<dyn LocalStore<E>>,
        remote: Arc<dyn RemoteApi<E>>,
        cascade: Arc<Cascade>,
    ) -> Self {
        Self {
            store,
            remote,
            cascade,
        }
    }

    pub fn store(&self) -> &Arc<dyn LocalStore<E>> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi<E>> {
        &self.remote
    }

    pub(crate) fn cascade(&self) -> &Cascade {
        &self.cascade
    }
}

#[async_trait]
impl<E: Entity> EntitySync for RecordSync<E> {
    type Entity = E;

    fn entity_stream(&self, id: &EntityId) -> EntityStream<E> {
        observe_entity(self.store.clone(), id.clone())
    }

    fn write_lock(&self) -> &Mutex<()> {
        self.cascade.write_lock()
    }

    async fn save_entity_to_api(&self, entity: &E) -> Result<UpsertOutcome<E>> {
        self.remote.upsert(entity).await
    }

    async fn delete_entity_from_api(
        &self,
        id: &EntityId,
        deleted_at: Timestamp,
    ) -> Result<DeleteOutcome<E>> {
        self.remote.delete(id, deleted_at).await
    }

    async fn save_entity_to_db(&self, entity: &E) -> Result<()> {
        if entity.is_deleted() {
            self.cascade.delete(E::TYPE_ID, entity.id()).await?;
            Ok(())
        } else {
            self.store.save(entity).await
        }
    }
}
