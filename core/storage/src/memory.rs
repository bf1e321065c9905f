//! In-memory local store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::watch;

use fieldbook_common::{Entity, EntityId, Error, Result};

use crate::store::LocalStore;

/// In-memory local store.
///
/// Useful for testing and previews. All data is stored in memory and lost
/// on drop.
pub struct MemoryStore<E: Entity> {
    records: RwLock<BTreeMap<EntityId, E>>,
    revision: watch::Sender<u64>,
}

impl<E: Entity> MemoryStore<E> {
    /// Create a new empty store.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: RwLock::new(BTreeMap::new()),
            revision,
        }
    }

    /// Number of stored records, including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::Storage("memory store lock poisoned".to_string())
}

#[async_trait]
impl<E: Entity> LocalStore<E> for MemoryStore<E> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &EntityId) -> Result<Option<E>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(id).cloned())
    }

    async fn get_all(&self, scope: Option<&EntityId>) -> Result<Vec<E>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|e| scope.is_none() || e.parent_id() == scope)
            .cloned()
            .collect())
    }

    async fn save(&self, entity: &E) -> Result<()> {
        {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.insert(entity.id().clone(), entity.clone());
        }
        self.bump();
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<()> {
        let removed = {
            let mut records = self.records.write().map_err(|_| poisoned())?;
            records.remove(id).is_some()
        };
        if removed {
            self.bump();
        }
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{observe_entity, observe_scope};
    use fieldbook_common::Timestamp;
    use fieldbook_records::{Client, Project};
    use futures::StreamExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = MemoryStore::<Client>::new();
        let client = Client::new("Acme");

        store.save(&client).await.unwrap();
        assert_eq!(store.get(client.id()).await.unwrap(), Some(client.clone()));

        store.delete(client.id()).await.unwrap();
        assert!(store.get(client.id()).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryStore::<Client>::new();
        store.delete(&EntityId::from("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_all_by_scope() {
        let store = MemoryStore::<Project>::new();
        let a = EntityId::from("client-a");
        let b = EntityId::from("client-b");

        store.save(&Project::new(a.clone(), "One")).await.unwrap();
        store.save(&Project::new(a.clone(), "Two")).await.unwrap();
        store.save(&Project::new(b.clone(), "Three")).await.unwrap();

        assert_eq!(store.get_all(Some(&a)).await.unwrap().len(), 2);
        assert_eq!(store.get_all(Some(&b)).await.unwrap().len(), 1);
        assert_eq!(store.get_all(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_observe_entity_emits_changes() {
        let store: Arc<dyn LocalStore<Client>> = Arc::new(MemoryStore::new());
        let mut client = Client::new("Acme");

        let mut stream = observe_entity(store.clone(), client.id().clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        client.set_updated_at(Timestamp::from_millis(1));
        store.save(&client).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Some(client.clone()));

        store.delete(client.id()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_observe_hides_soft_deleted() {
        let store: Arc<dyn LocalStore<Client>> = Arc::new(MemoryStore::new());
        let mut client = Client::new("Acme");
        client.set_deleted_at(Timestamp::from_millis(3));
        store.save(&client).await.unwrap();

        let mut stream = observe_entity(store.clone(), client.id().clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        let mut listing = observe_scope(store, None);
        assert!(listing.next().await.unwrap().unwrap().is_empty());
    }
}
