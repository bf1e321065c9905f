//! Local cascade deletion across parent/child entity types.
//!
//! Children are always removed before their parent so that an interrupted
//! cascade never leaves orphans behind a deleted parent.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use fieldbook_common::{Entity, EntityId, Error, Result};
use fieldbook_storage::LocalStore;

/// A record removed by a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedRecord {
    pub entity_type_id: String,
    pub id: EntityId,
}

/// One entity type's table, seen only through its place in the hierarchy.
#[async_trait]
pub trait CascadeNode: Send + Sync {
    fn entity_type_id(&self) -> &str;

    fn parent_type_id(&self) -> Option<&str>;

    /// Ids of the records owned by `parent`.
    async fn children_of(&self, parent: &EntityId) -> Result<Vec<EntityId>>;

    async fn remove(&self, id: &EntityId) -> Result<()>;
}

/// [`CascadeNode`] over a [`LocalStore`].
pub struct StoreNode<E: Entity> {
    store: Arc<dyn LocalStore<E>>,
}

impl<E: Entity> StoreNode<E> {
    pub fn new(store: Arc<dyn LocalStore<E>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<E: Entity> CascadeNode for StoreNode<E> {
    fn entity_type_id(&self) -> &str {
        E::TYPE_ID
    }

    fn parent_type_id(&self) -> Option<&str> {
        E::PARENT_TYPE_ID
    }

    async fn children_of(&self, parent: &EntityId) -> Result<Vec<EntityId>> {
        let children = self.store.get_all(Some(parent)).await?;
        Ok(children.iter().map(|child| child.id().clone()).collect())
    }

    async fn remove(&self, id: &EntityId) -> Result<()> {
        self.store.delete(id).await
    }
}

/// Registry of every entity type's table, in registration order.
///
/// Also owns the lock that serializes writes to those tables. Local
/// mutations and sync-driven writes (conflict write-backs, pulled changes)
/// take it around their check-then-write so neither clobbers the other.
/// [`Cascade::delete`] does not take it; callers hold it.
#[derive(Default)]
pub struct Cascade {
    nodes: Vec<Arc<dyn CascadeNode>>,
    writes: Mutex<()>,
}

impl Cascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table holding `E`.
    pub fn with_store<E: Entity>(self, store: Arc<dyn LocalStore<E>>) -> Self {
        self.with_node(Arc::new(StoreNode::new(store)))
    }

    pub fn with_node(mut self, node: Arc<dyn CascadeNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Registered entity types.
    pub fn entity_types(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.entity_type_id()).collect()
    }

    /// Lock guarding writes to the registered tables.
    pub fn write_lock(&self) -> &Mutex<()> {
        &self.writes
    }

    /// Delete a record and everything it owns, deepest descendants first.
    ///
    /// Returns the removed records in removal order.
    pub async fn delete(&self, entity_type_id: &str, id: &EntityId) -> Result<Vec<RemovedRecord>> {
        let mut removed = Vec::new();
        self.delete_into(entity_type_id, id, &mut removed).await?;
        Ok(removed)
    }

    /// Like [`Cascade::delete`], appending to `removed` as it goes.
    ///
    /// On error, `removed` still lists every record deleted before the
    /// failure.
    pub async fn delete_into(
        &self,
        entity_type_id: &str,
        id: &EntityId,
        removed: &mut Vec<RemovedRecord>,
    ) -> Result<()> {
        let before = removed.len();
        let result = self.delete_tree(entity_type_id, id.clone(), removed).await;
        debug!(
            "Cascade from {}/{} removed {} record(s)",
            entity_type_id,
            id,
            removed.len() - before
        );
        result
    }

    fn delete_tree<'a>(
        &'a self,
        entity_type_id: &'a str,
        id: EntityId,
        removed: &'a mut Vec<RemovedRecord>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let node = self.node(entity_type_id)?;

            for child_type in self.child_types(entity_type_id) {
                for child_id in child_type.children_of(&id).await? {
                    self.delete_tree(child_type.entity_type_id(), child_id, &mut *removed)
                        .await?;
                }
            }

            node.remove(&id).await?;
            removed.push(RemovedRecord {
                entity_type_id: node.entity_type_id().to_string(),
                id,
            });
            Ok(())
        }
        .boxed()
    }

    fn node(&self, entity_type_id: &str) -> Result<&Arc<dyn CascadeNode>> {
        self.nodes
            .iter()
            .find(|node| node.entity_type_id() == entity_type_id)
            .ok_or_else(|| {
                Error::InvalidInput(format!("Unknown entity type: {}", entity_type_id))
            })
    }

    fn child_types<'a>(
        &'a self,
        entity_type_id: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn CascadeNode>> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.parent_type_id() == Some(entity_type_id))
    }
}
