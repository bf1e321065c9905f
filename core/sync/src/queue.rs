//! Durable queue of pending push operations.
//!
//! At most one operation is pending per `(entity_type_id, entity_id)`. A
//! newer enqueue for the same record overwrites the operation type and stamp
//! in place, keeping the original position, so save-then-delete while
//! offline collapses into a single DELETE.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use fieldbook_common::{EntityId, Error, Result, Timestamp};
use fieldbook_storage::Database;

const QUEUE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        stamped_at INTEGER NOT NULL,
        revision INTEGER NOT NULL DEFAULT 0,
        UNIQUE (entity_type, entity_id)
    );
"#;

/// Kind of pending push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Upsert,
    Delete,
}

impl OperationType {
    fn as_str(&self) -> &'static str {
        match self {
            OperationType::Upsert => "UPSERT",
            OperationType::Delete => "DELETE",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "UPSERT" => Ok(OperationType::Upsert),
            "DELETE" => Ok(OperationType::Delete),
            other => Err(Error::Storage(format!("Unknown queued operation: {}", other))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Queue-internal id; also the queue position.
    pub id: i64,
    /// Tag routing the operation to its handler.
    pub entity_type_id: String,
    /// Record the operation applies to.
    pub entity_id: EntityId,
    /// Latest intent for the record.
    pub operation: OperationType,
    /// Logical time of the latest enqueue; sent as `deletedAt` for deletes.
    pub stamped_at: Timestamp,
    /// Bumped each time a newer intent is coalesced into this entry.
    pub revision: i64,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}/{}",
            self.id, self.operation, self.entity_type_id, self.entity_id
        )
    }
}

/// Durable coalescing queue stored next to the local records.
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    /// Open the queue on `db`, creating its table if needed.
    pub fn new(db: Database) -> Result<Self> {
        db.migrate(QUEUE_SCHEMA)?;
        Ok(Self { db })
    }

    /// Record an intent, coalescing with any pending one for the same record.
    pub fn enqueue(
        &self,
        entity_type_id: &str,
        entity_id: &EntityId,
        operation: OperationType,
        stamped_at: Timestamp,
    ) -> Result<()> {
        debug!("Enqueue {} {}/{}", operation, entity_type_id, entity_id);
        self.db.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO sync_queue (entity_type, entity_id, operation, stamped_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                    operation = excluded.operation,
                    stamped_at = excluded.stamped_at,
                    revision = revision + 1
                "#,
                params![
                    entity_type_id,
                    entity_id.as_str(),
                    operation.as_str(),
                    stamped_at.as_millis()
                ],
            )
        })?;
        Ok(())
    }

    /// All pending operations in enqueue order.
    pub fn get_all_pending(&self) -> Result<Vec<SyncOperation>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, entity_type, entity_id, operation, stamped_at, revision
                FROM sync_queue ORDER BY id
                "#,
            )?;
            let rows = stmt.query_map([], RawOperation::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter().map(RawOperation::into_operation).collect()
    }

    /// The pending operation for one record, if any.
    pub fn pending_for(
        &self,
        entity_type_id: &str,
        entity_id: &EntityId,
    ) -> Result<Option<SyncOperation>> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                r#"
                SELECT id, entity_type, entity_id, operation, stamped_at, revision
                FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2
                "#,
                params![entity_type_id, entity_id.as_str()],
                RawOperation::from_row,
            )
            .optional()
        })?;

        row.map(RawOperation::into_operation).transpose()
    }

    /// Remove a processed operation.
    ///
    /// The entry is only removed if it still holds the intent that was
    /// processed; an intent coalesced in while the operation was in flight
    /// stays queued. Returns whether the entry was removed.
    pub fn remove(&self, operation: &SyncOperation) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sync_queue WHERE id = ?1 AND revision = ?2",
                params![operation.id, operation.revision],
            )
        })?;
        Ok(removed > 0)
    }

    /// Number of pending operations.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0)))?;
        Ok(count as usize)
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Row as read from SQLite, before validation.
struct RawOperation {
    id: i64,
    entity_type_id: String,
    entity_id: String,
    operation: String,
    stamped_at: i64,
    revision: i64,
}

impl RawOperation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type_id: row.get(1)?,
            entity_id: row.get(2)?,
            operation: row.get(3)?,
            stamped_at: row.get(4)?,
            revision: row.get(5)?,
        })
    }

    fn into_operation(self) -> Result<SyncOperation> {
        Ok(SyncOperation {
            id: self.id,
            entity_type_id: self.entity_type_id,
            entity_id: EntityId::new(self.entity_id)?,
            operation: OperationType::parse(&self.operation)?,
            stamped_at: Timestamp::from_millis(self.stamped_at),
            revision: self.revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> SyncQueue {
        SyncQueue::new(Database::in_memory().unwrap()).unwrap()
    }

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_upsert_then_delete_coalesces() {
        let queue = queue();
        let id = EntityId::from("c1");

        queue.enqueue("clients", &id, OperationType::Upsert, ts(1)).unwrap();
        queue.enqueue("clients", &id, OperationType::Delete, ts(2)).unwrap();

        let pending = queue.get_all_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, OperationType::Delete);
        assert_eq!(pending[0].stamped_at, ts(2));
    }

    #[test]
    fn test_coalescing_keeps_position() {
        let queue = queue();
        let a = EntityId::from("a");
        let b = EntityId::from("b");

        queue.enqueue("clients", &a, OperationType::Upsert, ts(1)).unwrap();
        queue.enqueue("clients", &b, OperationType::Upsert, ts(2)).unwrap();
        queue.enqueue("clients", &a, OperationType::Delete, ts(3)).unwrap();

        let order: Vec<_> = queue
            .get_all_pending()
            .unwrap()
            .into_iter()
            .map(|op| op.entity_id)
            .collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_same_id_different_types_are_distinct() {
        let queue = queue();
        let id = EntityId::from("shared");

        queue.enqueue("clients", &id, OperationType::Upsert, ts(1)).unwrap();
        queue.enqueue("projects", &id, OperationType::Upsert, ts(1)).unwrap();

        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_remove_skips_newer_intent() {
        let queue = queue();
        let id = EntityId::from("c1");

        queue.enqueue("clients", &id, OperationType::Upsert, ts(1)).unwrap();
        let in_flight = queue.get_all_pending().unwrap().remove(0);

        // A delete arrives while the upsert is being pushed.
        queue.enqueue("clients", &id, OperationType::Delete, ts(2)).unwrap();

        assert!(!queue.remove(&in_flight).unwrap());
        let pending = queue.pending_for("clients", &id).unwrap().unwrap();
        assert_eq!(pending.operation, OperationType::Delete);

        assert!(queue.remove(&pending).unwrap());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_queue_survives_restart() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync.db");

        {
            let queue = SyncQueue::new(Database::open(&path).unwrap()).unwrap();
            queue
                .enqueue("findings", &EntityId::from("f1"), OperationType::Upsert, ts(5))
                .unwrap();
        }

        let queue = SyncQueue::new(Database::open(&path).unwrap()).unwrap();
        let pending = queue.get_all_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_type_id, "findings");
        assert_eq!(pending[0].stamped_at, ts(5));
    }
}
