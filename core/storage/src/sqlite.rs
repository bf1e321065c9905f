//! SQLite-backed local store.
//!
//! All entity types share one `records` table keyed by
//! `(entity_type, id)`; payloads are stored as JSON. The same [`Database`]
//! handle is reused by the sync crate for its queue and cursor tables.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info};

use fieldbook_common::{Entity, EntityId, Error, Result};

use crate::store::LocalStore;

const RECORDS_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        entity_type TEXT NOT NULL,
        id TEXT NOT NULL,
        parent_id TEXT,
        payload TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, id)
    );

    CREATE INDEX IF NOT EXISTS idx_records_parent ON records(entity_type, parent_id);
"#;

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Shared SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create or open a database file.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        let db = Self::from_connection(conn)?;
        info!("Opened local database at {}", path.as_ref().display());
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(RECORDS_SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a schema batch (idempotent `CREATE ... IF NOT EXISTS` statements).
    pub fn migrate(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }

    /// Run a closure against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("database lock poisoned".to_string()))?;
        f(&conn).map_err(storage_err)
    }
}

/// Local store for one entity type on a shared [`Database`].
pub struct SqliteStore<E: Entity> {
    db: Database,
    revision: watch::Sender<u64>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteStore<E> {
    /// Create a store for `E` on `db`.
    pub fn new(db: Database) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            db,
            revision,
            _entity: PhantomData,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn decode(payload: &str) -> Result<E> {
        serde_json::from_str(payload).map_err(Error::from)
    }
}

#[async_trait]
impl<E: Entity> LocalStore<E> for SqliteStore<E> {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, id: &EntityId) -> Result<Option<E>> {
        let payload: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT payload FROM records WHERE entity_type = ?1 AND id = ?2",
                params![E::TYPE_ID, id.as_str()],
                |row| row.get(0),
            )
            .optional()
        })?;

        payload.as_deref().map(Self::decode).transpose()
    }

    async fn get_all(&self, scope: Option<&EntityId>) -> Result<Vec<E>> {
        let payloads: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT payload FROM records
                WHERE entity_type = ?1 AND (?2 IS NULL OR parent_id = ?2)
                ORDER BY id
                "#,
            )?;
            let rows = stmt.query_map(
                params![E::TYPE_ID, scope.map(EntityId::as_str)],
                |row| row.get(0),
            )?;
            rows.collect()
        })?;

        payloads.iter().map(|p| Self::decode(p)).collect()
    }

    async fn save(&self, entity: &E) -> Result<()> {
        let payload = serde_json::to_string(entity)?;
        debug!("Saving {} {}", E::TYPE_ID, entity.id());

        self.db.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO records (entity_type, id, parent_id, payload, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(entity_type, id) DO UPDATE SET
                    parent_id = excluded.parent_id,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
                params![
                    E::TYPE_ID,
                    entity.id().as_str(),
                    entity.parent_id().map(EntityId::as_str),
                    payload,
                    entity.updated_at().as_millis(),
                ],
            )
        })?;

        self.bump();
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<()> {
        debug!("Deleting {} {}", E::TYPE_ID, id);
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
                params![E::TYPE_ID, id.as_str()],
            )
        })?;

        if removed > 0 {
            self.bump();
        }
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
