//! Optimistic local mutations.
//!
//! Every mutation is applied to local storage first, then recorded in the
//! sync queue; the caller never waits on the network.

use std::sync::Arc;
use tracing::{debug, warn};

use fieldbook_common::{Entity, EntityId, Error, Result};
use fieldbook_storage::{observe_entity, observe_scope, EntityStream, LocalStore, ScopeStream};
use fieldbook_sync::{Cascade, OperationType, RemovedRecord, SyncEngine};

/// Use cases for one record type.
pub struct LocalRepository<E: Entity> {
    store: Arc<dyn LocalStore<E>>,
    engine: Arc<SyncEngine>,
    cascade: Arc<Cascade>,
}

impl<E: Entity> Clone for LocalRepository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            engine: self.engine.clone(),
            cascade: self.cascade.clone(),
        }
    }
}

impl<E: Entity> LocalRepository<E> {
    pub fn new(
        store: Arc<dyn LocalStore<E>>,
        engine: Arc<SyncEngine>,
        cascade: Arc<Cascade>,
    ) -> Self {
        Self {
            store,
            engine,
            cascade,
        }
    }

    pub async fn get(&self, id: &EntityId) -> Result<Option<E>> {
        self.store.get(id).await
    }

    /// Records, optionally only those owned by `scope`.
    pub async fn list(&self, scope: Option<&EntityId>) -> Result<Vec<E>> {
        self.store.get_all(scope).await
    }

    pub fn observe(&self, id: &EntityId) -> EntityStream<E> {
        observe_entity(self.store.clone(), id.clone())
    }

    pub fn observe_scope(&self, scope: Option<EntityId>) -> ScopeStream<E> {
        observe_scope(self.store.clone(), scope)
    }

    /// Stamp, store locally and queue an upsert.
    ///
    /// `entity.updated_at` is overwritten with the new stamp.
    pub async fn save(&self, entity: &mut E) -> Result<()> {
        if entity.is_deleted() {
            return Err(Error::InvalidInput(format!(
                "{} {} is deleted and cannot be edited",
                E::TYPE_ID,
                entity.id()
            )));
        }

        let _writes = self.cascade.write_lock().lock().await;
        let stamp = self.engine.clock().now();
        entity.set_updated_at(stamp);
        self.store.save(entity).await?;
        self.engine
            .enqueue_at(E::TYPE_ID, entity.id(), OperationType::Upsert, stamp)?;

        debug!("Saved {}/{} at {}", E::TYPE_ID, entity.id(), stamp);
        Ok(())
    }

    /// Delete locally with everything the record owns, and queue a delete
    /// for each removed record, children first.
    ///
    /// If the cascade fails partway, deletes are still queued for the
    /// records it already removed before the error is returned.
    pub async fn delete(&self, id: &EntityId) -> Result<Vec<RemovedRecord>> {
        let _writes = self.cascade.write_lock().lock().await;
        let stamp = self.engine.clock().now();
        let mut removed = Vec::new();
        let cascaded = self.cascade.delete_into(E::TYPE_ID, id, &mut removed).await;

        for record in &removed {
            self.engine.enqueue_at(
                &record.entity_type_id,
                &record.id,
                OperationType::Delete,
                stamp,
            )?;
        }
        if let Err(error) = cascaded {
            warn!(
                "Delete of {}/{} stopped after {} record(s): {}",
                E::TYPE_ID,
                id,
                removed.len(),
                error
            );
            return Err(error);
        }

        debug!(
            "Deleted {}/{} and {} descendant(s) at {}",
            E::TYPE_ID,
            id,
            removed.len().saturating_sub(1),
            stamp
        );
        Ok(removed)
    }
}
