//! Pull-side orchestration.
//!
//! A pull always runs inside [`SyncEngine::with_flushed_queue`], so pending
//! local pushes reach the server before server state is applied locally.
//! The cursor only advances after every pulled change has been applied.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use fieldbook_common::{Clock, Entity, EntityId, Error, Result, Timestamp};
use fieldbook_remote::RemoteChange;

use crate::cursor::{CursorKey, CursorStore};
use crate::engine::{DrainReport, SyncEngine};
use crate::handler::RecordSync;
use crate::queue::SyncQueue;

/// Counts of changes applied by one pull.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullStats {
    pub updated: usize,
    pub deleted: usize,
    /// Changes left alone because a local push for the record is pending.
    pub skipped: usize,
}

/// Fetches and applies server changes for one entity type.
#[async_trait]
pub trait PullSource: Send + Sync {
    fn entity_type_id(&self) -> &str;

    /// Apply everything changed at or after `since`.
    ///
    /// A record with a push still in `queue` when its change is applied
    /// keeps its local state; the push's answer reconciles it.
    async fn pull_since(
        &self,
        scope: Option<&EntityId>,
        since: Timestamp,
        queue: &SyncQueue,
    ) -> Result<PullStats>;
}

#[async_trait]
impl<E: Entity> PullSource for RecordSync<E> {
    fn entity_type_id(&self) -> &str {
        E::TYPE_ID
    }

    async fn pull_since(
        &self,
        scope: Option<&EntityId>,
        since: Timestamp,
        queue: &SyncQueue,
    ) -> Result<PullStats> {
        let changes = self.remote().modified_since(scope, since).await?;
        let mut stats = PullStats::default();

        for change in changes {
            // Checked under the write lock, so an edit saved while the fetch
            // was in flight is seen here and cannot land after the check.
            let _writes = self.cascade().write_lock().lock().await;
            if queue.pending_for(E::TYPE_ID, change.id())?.is_some() {
                debug!("Skipping pulled {}/{}: push pending", E::TYPE_ID, change.id());
                stats.skipped += 1;
                continue;
            }
            match change {
                RemoteChange::Updated(entity) => {
                    self.store().save(&entity).await?;
                    stats.updated += 1;
                }
                RemoteChange::Deleted { id, .. } => {
                    self.cascade().delete(E::TYPE_ID, &id).await?;
                    stats.deleted += 1;
                }
            }
        }

        Ok(stats)
    }
}

/// Result of one successful pull.
#[derive(Debug)]
pub struct PullReport {
    pub key: CursorKey,
    /// Watermark the pull started from.
    pub since: Timestamp,
    /// Watermark stored after applying.
    pub advanced_to: Timestamp,
    pub stats: PullStats,
    /// The flush that preceded the pull.
    pub flush: DrainReport,
}

/// The pull orchestrator.
pub struct PullCoordinator {
    engine: Arc<SyncEngine>,
    cursors: Arc<CursorStore>,
    sources: HashMap<String, Arc<dyn PullSource>>,
}

impl PullCoordinator {
    pub fn new(engine: Arc<SyncEngine>, cursors: Arc<CursorStore>) -> Self {
        Self {
            engine,
            cursors,
            sources: HashMap::new(),
        }
    }

    /// Register a source under its entity type tag.
    pub fn register(&mut self, source: Arc<dyn PullSource>) -> Result<()> {
        let entity_type_id = source.entity_type_id().to_string();
        if self.sources.contains_key(&entity_type_id) {
            return Err(Error::InvalidInput(format!(
                "Pull source '{}' already registered",
                entity_type_id
            )));
        }
        self.sources.insert(entity_type_id, source);
        Ok(())
    }

    pub fn cursors(&self) -> &Arc<CursorStore> {
        &self.cursors
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Flush pending pushes, then fetch and apply server changes for `key`.
    ///
    /// On failure the cursor is left where it was.
    pub async fn pull(&self, key: &CursorKey) -> Result<PullReport> {
        let source = self
            .sources
            .get(&key.entity_type_id)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidInput(format!("No pull source for '{}'", key.entity_type_id))
            })?;

        self.engine
            .with_flushed_queue(|flush| async move {
                let result = self.pull_flushed(source.as_ref(), key, flush).await;
                match &result {
                    Ok(report) => {
                        self.engine.status().pull_succeeded();
                        info!(
                            "Pulled {}: {} updated, {} deleted, {} skipped",
                            key, report.stats.updated, report.stats.deleted, report.stats.skipped
                        );
                    }
                    Err(error) => {
                        self.engine.status().pull_failed(error);
                        warn!("Pull of {} failed: {}", key, error);
                    }
                }
                result
            })
            .await
    }

    async fn pull_flushed(
        &self,
        source: &dyn PullSource,
        key: &CursorKey,
        flush: DrainReport,
    ) -> Result<PullReport> {
        let since = self
            .cursors
            .last_synced_at(key)?
            .unwrap_or(Timestamp::ZERO);
        // Captured before the request so changes landing mid-request are
        // fetched again next time.
        let now = self.engine.clock().now();

        let cancel = self.engine.cancellation();
        let stats = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled(format!("pull of {}", key))),
            stats = source.pull_since(key.scope.as_ref(), since, self.engine.queue()) => stats,
        }?;

        self.cursors.advance(key, now)?;

        Ok(PullReport {
            key: key.clone(),
            since,
            advanced_to: now,
            stats,
            flush,
        })
    }

    /// Pull each key in turn. A failed key does not stop the others.
    pub async fn pull_all(&self, keys: &[CursorKey]) -> Vec<Result<PullReport>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if self.engine.cancellation().is_cancelled() {
                results.push(Err(Error::Cancelled(format!("pull of {}", key))));
                continue;
            }
            results.push(self.pull(key).await);
        }
        results
    }
}
