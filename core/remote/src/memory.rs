//! In-memory server for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::debug;

use fieldbook_common::{
    ConflictResolver, DeleteOutcome, Entity, EntityId, Error, Result, Timestamp, UpsertOutcome,
};

use crate::api::{RemoteApi, RemoteChange};

/// A request observed by the in-memory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List,
    Upsert(EntityId),
    Delete(EntityId),
}

/// In-memory server-side write acceptor.
///
/// Stores soft-deleted rows as tombstones and runs every write through the
/// [`ConflictResolver`], exactly like the real server. Connectivity and
/// per-record rejections can be simulated.
pub struct MemoryRemote<E: Entity> {
    rows: RwLock<BTreeMap<EntityId, E>>,
    resolver: ConflictResolver,
    online: AtomicBool,
    rejected: RwLock<HashSet<EntityId>>,
    requests: RwLock<Vec<Request>>,
}

impl<E: Entity> MemoryRemote<E> {
    /// Create a new empty server.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            resolver: ConflictResolver::new(),
            online: AtomicBool::new(true),
            rejected: RwLock::new(HashSet::new()),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Answer every write for `id` with a server error until cleared.
    pub fn reject_writes_for(&self, id: &EntityId) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.insert(id.clone());
        }
    }

    /// Stop rejecting writes for `id`.
    pub fn accept_writes_for(&self, id: &EntityId) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.remove(id);
        }
    }

    /// Current server row, including tombstones.
    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.rows.read().ok().and_then(|rows| rows.get(id).cloned())
    }

    /// Store a row directly, bypassing conflict resolution.
    pub fn seed(&self, entity: E) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(entity.id().clone(), entity);
        }
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.read().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: Request) {
        if let Ok(mut requests) = self.requests.write() {
            requests.push(request);
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Offline(format!("{} server unreachable", E::TYPE_ID)))
        }
    }

    fn ensure_accepts(&self, id: &EntityId) -> Result<()> {
        let rejected = self
            .rejected
            .read()
            .map(|r| r.contains(id))
            .unwrap_or(false);
        if rejected {
            Err(Error::Rejected {
                status: 500,
                message: format!("write to {} {} failed", E::TYPE_ID, id),
            })
        } else {
            Ok(())
        }
    }

    fn rows_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<EntityId, E>>> {
        self.rows
            .write()
            .map_err(|_| Error::Unexpected("server state poisoned".to_string()))
    }
}

impl<E: Entity> Default for MemoryRemote<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> RemoteApi<E> for MemoryRemote<E> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn modified_since(
        &self,
        scope: Option<&EntityId>,
        since: Timestamp,
    ) -> Result<Vec<RemoteChange<E>>> {
        self.ensure_online()?;
        self.record(Request::List);

        let rows = self
            .rows
            .read()
            .map_err(|_| Error::Unexpected("server state poisoned".to_string()))?;
        Ok(rows
            .values()
            .filter(|e| scope.is_none() || e.parent_id() == scope)
            .filter(|e| e.sync_timestamp() >= since)
            .cloned()
            .map(RemoteChange::from_entity)
            .collect())
    }

    async fn upsert(&self, entity: &E) -> Result<UpsertOutcome<E>> {
        self.ensure_online()?;
        self.record(Request::Upsert(entity.id().clone()));
        self.ensure_accepts(entity.id())?;

        let mut rows = self.rows_mut()?;
        let mut slot = rows.get(entity.id()).cloned();
        let outcome = self.resolver.apply_upsert(&mut slot, entity.clone());
        if let Some(stored) = slot {
            rows.insert(stored.id().clone(), stored);
        }

        debug!("Server upsert {} {}: {}", E::TYPE_ID, entity.id(), outcome_name(&outcome));
        Ok(outcome)
    }

    async fn delete(&self, id: &EntityId, deleted_at: Timestamp) -> Result<DeleteOutcome<E>> {
        self.ensure_online()?;
        self.record(Request::Delete(id.clone()));
        self.ensure_accepts(id)?;

        let mut rows = self.rows_mut()?;
        let mut slot = rows.get(id).cloned();
        let outcome = self.resolver.apply_delete(&mut slot, deleted_at);
        if let Some(stored) = slot {
            rows.insert(id.clone(), stored);
        }
        Ok(outcome)
    }
}

fn outcome_name<E>(outcome: &UpsertOutcome<E>) -> &'static str {
    match outcome {
        UpsertOutcome::Accepted => "accepted",
        UpsertOutcome::RejectedWithCurrent(_) => "rejected",
    }
}
