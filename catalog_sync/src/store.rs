//! Persistent entity store
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Canonical entities are stored as JSON next to their fingerprint; each
//! source's latest parsed records are kept as a staged snapshot so that a
//! later cycle of another source can merge against them.

use chrono::{DateTime, Utc};
use mtg_common::{CanonicalEntity, EntityKind, FieldMap, IntermediateRecord, SourceId};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored data could not be (de)serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("failed to create database directory {path}: {message}")]
    Directory { path: String, message: String },

    #[error("persistence task failed: {0}")]
    Join(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `entities`: canonical entities with their fingerprints
/// - `source_records`: each source's latest parsed records
/// - `source_versions`: the version ledger
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entities (
            kind TEXT NOT NULL,
            key TEXT NOT NULL,
            body TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (kind, key)
        );

        CREATE TABLE IF NOT EXISTS source_records (
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            key TEXT NOT NULL,
            fields TEXT NOT NULL,
            PRIMARY KEY (source, kind, key)
        );

        CREATE INDEX IF NOT EXISTS idx_source_records_kind ON source_records(kind, key);

        CREATE TABLE IF NOT EXISTS source_versions (
            source TEXT PRIMARY KEY,
            version_token TEXT,
            upstream_version TEXT,
            last_success_at TEXT,
            last_attempt_at TEXT,
            last_error TEXT
        );
        ",
    )?;

    log::debug!("Database schema initialized");
    Ok(())
}

/// Open (creating if needed) a database file and initialize its schema
pub fn open_database(path: &Path) -> StoreResult<Arc<Mutex<Connection>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Directory {
                path: parent.display().to_string(),
                message: e.to_string(),
            })?;
            log::info!("Created directory: {}", parent.display());
        }
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    log::info!("Opened database: {}", path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open an in-memory database with the schema applied
pub fn open_in_memory() -> StoreResult<Arc<Mutex<Connection>>> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(db: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| StoreError::Poisoned)
}

pub(crate) fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// A canonical entity as persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntity {
    pub entity: CanonicalEntity,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage the sync engine writes through.
///
/// Implementations must make each `put` atomic on its own and
/// `replace_source_records` atomic as a whole.
pub trait EntityStore: Send + Sync {
    fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<StoredEntity>>;

    /// Insert or replace an entity with its fingerprint
    fn put(&self, entity: &CanonicalEntity, fingerprint: &str) -> StoreResult<()>;

    fn list_all(&self, kind: EntityKind) -> StoreResult<Vec<StoredEntity>>;

    /// Remove an entity, returning whether it existed
    fn delete(&self, kind: EntityKind, key: &str) -> StoreResult<bool>;

    /// Staged snapshot of one source's records of one kind
    fn source_records(&self, source: SourceId, kind: EntityKind) -> StoreResult<Vec<IntermediateRecord>>;

    /// Replace a source's whole staged snapshot
    fn replace_source_records(&self, source: SourceId, records: &[IntermediateRecord]) -> StoreResult<()>;

    fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        Ok(self.list_all(kind)?.len())
    }
}

/// SQLite-backed [`EntityStore`]
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Wrap a shared connection, making sure the schema exists
    pub fn new(db: Arc<Mutex<Connection>>) -> StoreResult<Self> {
        init_schema(&*lock(&db)?)?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<DateTime<Utc>>)> {
    Ok((row.get(0)?, row.get(1)?, parse_timestamp(row, 2)?))
}

fn decode_entity(body: String, fingerprint: String, updated_at: Option<DateTime<Utc>>) -> StoreResult<StoredEntity> {
    Ok(StoredEntity {
        entity: serde_json::from_str(&body)?,
        fingerprint,
        updated_at: updated_at.unwrap_or_default(),
    })
}

fn replace_source_records_tx(
    tx: &Transaction<'_>,
    source: SourceId,
    records: &[IntermediateRecord],
) -> StoreResult<usize> {
    tx.execute(
        "DELETE FROM source_records WHERE source = ?1",
        params![source.as_str()],
    )?;

    let mut stmt = tx.prepare_cached(
        "INSERT INTO source_records (source, kind, key, fields) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut count = 0;
    for record in records {
        let fields = serde_json::to_string(&record.fields)?;
        stmt.execute(params![source.as_str(), record.kind.as_str(), &record.key, fields])?;
        count += 1;
    }
    Ok(count)
}

impl EntityStore for SqliteStore {
    fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<StoredEntity>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare_cached(
            "SELECT body, fingerprint, updated_at FROM entities WHERE kind = ?1 AND key = ?2",
        )?;
        let mut rows = stmt.query(params![kind.as_str(), key])?;
        match rows.next()? {
            Some(row) => {
                let (body, fingerprint, updated_at) = entity_from_row(row)?;
                Ok(Some(decode_entity(body, fingerprint, updated_at)?))
            }
            None => Ok(None),
        }
    }

    fn put(&self, entity: &CanonicalEntity, fingerprint: &str) -> StoreResult<()> {
        let body = serde_json::to_string(entity)?;
        let conn = lock(&self.db)?;
        conn.execute(
            "INSERT OR REPLACE INTO entities (kind, key, body, fingerprint, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entity.kind().as_str(),
                entity.key(),
                body,
                fingerprint,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn list_all(&self, kind: EntityKind) -> StoreResult<Vec<StoredEntity>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare_cached(
            "SELECT body, fingerprint, updated_at FROM entities WHERE kind = ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], entity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(body, fingerprint, updated_at)| decode_entity(body, fingerprint, updated_at))
            .collect()
    }

    fn delete(&self, kind: EntityKind, key: &str) -> StoreResult<bool> {
        let conn = lock(&self.db)?;
        let removed = conn.execute(
            "DELETE FROM entities WHERE kind = ?1 AND key = ?2",
            params![kind.as_str(), key],
        )?;
        Ok(removed > 0)
    }

    fn source_records(&self, source: SourceId, kind: EntityKind) -> StoreResult<Vec<IntermediateRecord>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, fields FROM source_records WHERE source = ?1 AND kind = ?2 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![source.as_str(), kind.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(key, fields)| {
                let fields: FieldMap = serde_json::from_str(&fields)?;
                Ok(IntermediateRecord::new(source, kind, key, fields))
            })
            .collect()
    }

    fn replace_source_records(&self, source: SourceId, records: &[IntermediateRecord]) -> StoreResult<()> {
        let mut conn = lock(&self.db)?;
        let tx = conn.transaction()?;
        let count = replace_source_records_tx(&tx, source, records)?;
        tx.commit()?;
        log::debug!("{}: staged {} source records", source, count);
        Ok(())
    }

    fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        let conn = lock(&self.db)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtg_common::{Set, SymbolSet};

    fn test_store() -> SqliteStore {
        SqliteStore::new(open_in_memory().unwrap()).unwrap()
    }

    fn make_set(code: &str, name: &str) -> CanonicalEntity {
        let fields = FieldMap::new()
            .with("name", name)
            .with("date_released", "2021-06-18")
            .with("count_cards", 303i64);
        CanonicalEntity::Set(Set::from_fields(code, &fields).unwrap())
    }

    #[test]
    fn init_schema_is_idempotent() {
        let db = open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn get_missing_entity_returns_none() {
        let store = test_store();
        assert!(store.get(EntityKind::Set, "mh2").unwrap().is_none());
    }

    #[test]
    fn fingerprint_survives_round_trip() {
        let store = test_store();
        let entity = make_set("mh2", "Modern Horizons 2");
        let fingerprint = entity.fingerprint().unwrap();
        store.put(&entity, &fingerprint).unwrap();

        let stored = store.get(EntityKind::Set, "mh2").unwrap().unwrap();
        assert_eq!(stored.entity, entity);
        assert_eq!(stored.fingerprint, fingerprint);
        assert_eq!(stored.entity.fingerprint().unwrap(), fingerprint);
    }

    #[test]
    fn put_replaces_existing_entity() {
        let store = test_store();
        let first = make_set("mh2", "Modern Horizons 2");
        store.put(&first, &first.fingerprint().unwrap()).unwrap();
        let second = make_set("mh2", "Modern Horizons Two");
        store.put(&second, &second.fingerprint().unwrap()).unwrap();

        assert_eq!(store.count(EntityKind::Set).unwrap(), 1);
        let stored = store.get(EntityKind::Set, "mh2").unwrap().unwrap();
        assert_eq!(stored.entity, second);
    }

    #[test]
    fn list_all_filters_by_kind_and_orders_by_key() {
        let store = test_store();
        for (code, name) in [("znr", "Zendikar Rising"), ("afr", "Forgotten Realms")] {
            let entity = make_set(code, name);
            store.put(&entity, &entity.fingerprint().unwrap()).unwrap();
        }
        let symbol = CanonicalEntity::SymbolSet(SymbolSet {
            code: "AFR".into(),
            parent: None,
            supported: vec!["C".into()],
        });
        store.put(&symbol, &symbol.fingerprint().unwrap()).unwrap();

        let keys: Vec<String> = store
            .list_all(EntityKind::Set)
            .unwrap()
            .into_iter()
            .map(|s| s.entity.key().to_string())
            .collect();
        assert_eq!(keys, vec!["afr", "znr"]);
        assert_eq!(store.count(EntityKind::SymbolSet).unwrap(), 1);
    }

    #[test]
    fn delete_reports_existence() {
        let store = test_store();
        let entity = make_set("mh2", "Modern Horizons 2");
        store.put(&entity, &entity.fingerprint().unwrap()).unwrap();

        assert!(store.delete(EntityKind::Set, "mh2").unwrap());
        assert!(!store.delete(EntityKind::Set, "mh2").unwrap());
    }

    #[test]
    fn replace_source_records_swaps_whole_snapshot() {
        let store = test_store();
        let record = |key: &str, count: i64| {
            IntermediateRecord::new(
                SourceId::Mtgjson,
                EntityKind::Set,
                key,
                FieldMap::new().with("count_printed", count),
            )
        };

        store
            .replace_source_records(SourceId::Mtgjson, &[record("abc", 1), record("def", 2)])
            .unwrap();
        store
            .replace_source_records(SourceId::Mtgjson, &[record("abc", 3)])
            .unwrap();

        let staged = store.source_records(SourceId::Mtgjson, EntityKind::Set).unwrap();
        assert_eq!(staged, vec![record("abc", 3)]);
        assert!(store
            .source_records(SourceId::Scryfall, EntityKind::Set)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn corrupt_body_is_a_serialize_error() {
        let store = test_store();
        {
            let conn = store.db.lock().unwrap();
            conn.execute(
                "INSERT INTO entities (kind, key, body, fingerprint, updated_at)
                 VALUES ('set', 'bad', '{not json', 'x', '2024-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.get(EntityKind::Set, "bad"),
            Err(StoreError::Serialize(_))
        ));
    }
}
