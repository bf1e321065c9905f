//! Per-scope pull cursors.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

use fieldbook_common::{EntityId, Result, Timestamp};
use fieldbook_storage::Database;

const CURSOR_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS pull_cursors (
        entity_type TEXT NOT NULL,
        scope_id TEXT NOT NULL DEFAULT '',
        last_synced_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, scope_id)
    );
"#;

/// Identifies one pull watermark: an entity type, optionally scoped to a
/// parent record (e.g. inspections of one project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorKey {
    pub entity_type_id: String,
    #[serde(default)]
    pub scope: Option<EntityId>,
}

impl CursorKey {
    /// Cursor over a whole entity type.
    pub fn unscoped(entity_type_id: impl Into<String>) -> Self {
        Self {
            entity_type_id: entity_type_id.into(),
            scope: None,
        }
    }

    /// Cursor over the records owned by `scope`.
    pub fn scoped(entity_type_id: impl Into<String>, scope: EntityId) -> Self {
        Self {
            entity_type_id: entity_type_id.into(),
            scope: Some(scope),
        }
    }

    fn scope_column(&self) -> &str {
        self.scope.as_ref().map(EntityId::as_str).unwrap_or("")
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.entity_type_id, scope),
            None => f.write_str(&self.entity_type_id),
        }
    }
}

/// Durable store of `lastSyncedAt` per [`CursorKey`].
pub struct CursorStore {
    db: Database,
}

impl CursorStore {
    /// Open the cursor table on `db`, creating it if needed.
    pub fn new(db: Database) -> Result<Self> {
        db.migrate(CURSOR_SCHEMA)?;
        Ok(Self { db })
    }

    /// Watermark for `key`; `None` if never pulled.
    pub fn last_synced_at(&self, key: &CursorKey) -> Result<Option<Timestamp>> {
        let millis: Option<i64> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT last_synced_at FROM pull_cursors WHERE entity_type = ?1 AND scope_id = ?2",
                params![key.entity_type_id, key.scope_column()],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(millis.map(Timestamp::from_millis))
    }

    /// Move the watermark for `key` forward to `to`. Never moves it back.
    pub fn advance(&self, key: &CursorKey, to: Timestamp) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO pull_cursors (entity_type, scope_id, last_synced_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(entity_type, scope_id) DO UPDATE SET
                    last_synced_at = MAX(last_synced_at, excluded.last_synced_at)
                "#,
                params![key.entity_type_id, key.scope_column(), to.as_millis()],
            )
        })?;
        Ok(())
    }

    /// Every stored cursor, ordered by key.
    pub fn all(&self) -> Result<Vec<(CursorKey, Timestamp)>> {
        let rows: Vec<(String, String, i64)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_type, scope_id, last_synced_at FROM pull_cursors ORDER BY entity_type, scope_id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect()
        })?;

        rows.into_iter()
            .map(|(entity_type_id, scope, millis)| {
                let scope = if scope.is_empty() {
                    None
                } else {
                    Some(EntityId::new(scope)?)
                };
                Ok((
                    CursorKey {
                        entity_type_id,
                        scope,
                    },
                    Timestamp::from_millis(millis),
                ))
            })
            .collect()
    }

    /// Forget every cursor, forcing the next pulls to fetch full history.
    pub fn reset(&self) -> Result<()> {
        self.db
            .with_conn(|conn| conn.execute("DELETE FROM pull_cursors", []))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> CursorStore {
        CursorStore::new(Database::in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_absent_cursor() {
        let cursors = store();
        let key = CursorKey::unscoped("clients");
        assert_eq!(cursors.last_synced_at(&key).unwrap(), None);
    }

    #[test]
    fn test_scopes_are_independent() {
        let cursors = store();
        let all = CursorKey::unscoped("inspections");
        let p1 = CursorKey::scoped("inspections", EntityId::from("p1"));
        let p2 = CursorKey::scoped("inspections", EntityId::from("p2"));

        cursors.advance(&p1, Timestamp::from_millis(100)).unwrap();

        assert_eq!(
            cursors.last_synced_at(&p1).unwrap(),
            Some(Timestamp::from_millis(100))
        );
        assert_eq!(cursors.last_synced_at(&p2).unwrap(), None);
        assert_eq!(cursors.last_synced_at(&all).unwrap(), None);
    }

    #[test]
    fn test_advance_never_rewinds() {
        let cursors = store();
        let key = CursorKey::unscoped("clients");

        cursors.advance(&key, Timestamp::from_millis(200)).unwrap();
        cursors.advance(&key, Timestamp::from_millis(150)).unwrap();

        assert_eq!(
            cursors.last_synced_at(&key).unwrap(),
            Some(Timestamp::from_millis(200))
        );
    }

    #[test]
    fn test_all_and_reset() {
        let cursors = store();
        cursors
            .advance(&CursorKey::unscoped("clients"), Timestamp::from_millis(1))
            .unwrap();
        cursors
            .advance(
                &CursorKey::scoped("findings", EntityId::from("s1")),
                Timestamp::from_millis(2),
            )
            .unwrap();

        let all = cursors.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].0.to_string(), "findings@s1");

        cursors.reset().unwrap();
        assert!(cursors.all().unwrap().is_empty());
    }

    #[test]
    fn test_cursor_survives_restart() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync.db");
        let key = CursorKey::unscoped("projects");

        {
            let cursors = CursorStore::new(Database::open(&path).unwrap()).unwrap();
            cursors.advance(&key, Timestamp::from_millis(42)).unwrap();
        }

        let cursors = CursorStore::new(Database::open(&path).unwrap()).unwrap();
        assert_eq!(
            cursors.last_synced_at(&key).unwrap(),
            Some(Timestamp::from_millis(42))
        );
    }
}
