//! Version ledger
//!
//! Remembers, per source, the token of the last successfully applied
//! payload and when that happened. The orchestrator consults it before
//! fetching and advances it only after entity writes have committed.

use crate::fetch::VersionToken;
use crate::store::{init_schema, lock, parse_timestamp, StoreResult};
use chrono::{DateTime, Utc};
use mtg_common::SourceId;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ledger row for one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceVersionRecord {
    pub source: SourceId,
    pub version_token: Option<VersionToken>,
    /// Version string published by the upstream itself
    pub upstream_version: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Handle to the `source_versions` table
#[derive(Clone)]
pub struct VersionLedger {
    db: Arc<Mutex<Connection>>,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SourceVersionRecord> {
    let source: String = row.get(0)?;
    let source = source
        .parse::<SourceId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?;
    let token: Option<String> = row.get(1)?;
    let version_token = token
        .map(|t| t.parse::<VersionToken>())
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;

    Ok(SourceVersionRecord {
        source,
        version_token,
        upstream_version: row.get(2)?,
        last_success_at: parse_timestamp(row, 3)?,
        last_attempt_at: parse_timestamp(row, 4)?,
        last_error: row.get(5)?,
    })
}

const SELECT_COLUMNS: &str = "SELECT source, version_token, upstream_version, last_success_at, \
     last_attempt_at, last_error FROM source_versions";

impl VersionLedger {
    pub fn new(db: Arc<Mutex<Connection>>) -> StoreResult<Self> {
        init_schema(&*lock(&db)?)?;
        Ok(Self { db })
    }

    pub fn get(&self, source: SourceId) -> StoreResult<Option<SourceVersionRecord>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE source = ?1", SELECT_COLUMNS))?;
        let mut rows = stmt.query(params![source.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(record_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All ledger rows, ordered by source name
    pub fn list(&self) -> StoreResult<Vec<SourceVersionRecord>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare_cached(&format!("{} ORDER BY source", SELECT_COLUMNS))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Whether a source is due for a fetch.
    ///
    /// True when forced, never synced, or the last success is at least
    /// `min_interval` old.
    pub fn needs_refresh(
        &self,
        source: SourceId,
        force: bool,
        min_interval: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if force {
            return Ok(true);
        }
        let Some(last_success) = self.get(source)?.and_then(|r| r.last_success_at) else {
            return Ok(true);
        };
        let elapsed = now.signed_duration_since(last_success);
        // A clock that went backwards counts as elapsed time unknown: refresh
        Ok(elapsed
            .to_std()
            .map(|elapsed| elapsed >= min_interval)
            .unwrap_or(true))
    }

    /// Advance a source to `token`. Safe to repeat with the same arguments.
    pub fn record_success(
        &self,
        source: SourceId,
        token: &VersionToken,
        upstream_version: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.record_success_with_note(source, token, upstream_version, None, now)
    }

    /// Advance a source while keeping a note about entities that could not
    /// be reconciled
    pub fn record_success_with_note(
        &self,
        source: SourceId,
        token: &VersionToken,
        upstream_version: Option<&str>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = lock(&self.db)?;
        let now = now.to_rfc3339();
        conn.execute(
            "INSERT INTO source_versions
                 (source, version_token, upstream_version, last_success_at, last_attempt_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)
             ON CONFLICT(source) DO UPDATE SET
                 version_token = excluded.version_token,
                 upstream_version = COALESCE(excluded.upstream_version, source_versions.upstream_version),
                 last_success_at = excluded.last_success_at,
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = excluded.last_error",
            params![source.as_str(), token.to_string(), upstream_version, now, note],
        )?;
        log::debug!("{}: ledger advanced to {}", source, token);
        Ok(())
    }

    /// Record that upstream still serves the payload behind `token`.
    ///
    /// Advances the success time only. A note left by the last successful
    /// cycle stays, since the entities it lists are still unreconciled; an
    /// error from a failed cycle since then is cleared.
    pub fn record_unchanged(&self, source: SourceId, token: &VersionToken, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = lock(&self.db)?;
        let now = now.to_rfc3339();
        conn.execute(
            "INSERT INTO source_versions (source, version_token, last_success_at, last_attempt_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(source) DO UPDATE SET
                 version_token = excluded.version_token,
                 last_success_at = excluded.last_success_at,
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = CASE
                     WHEN source_versions.last_attempt_at = source_versions.last_success_at
                     THEN source_versions.last_error
                     ELSE NULL
                 END",
            params![source.as_str(), token.to_string(), now],
        )?;
        log::debug!("{}: ledger still at {}", source, token);
        Ok(())
    }

    /// Record a failed cycle. The stored token and success time are kept.
    pub fn record_failure(&self, source: SourceId, error: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = lock(&self.db)?;
        conn.execute(
            "INSERT INTO source_versions (source, last_attempt_at, last_error)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET
                 last_attempt_at = excluded.last_attempt_at,
                 last_error = excluded.last_error",
            params![source.as_str(), now.to_rfc3339(), error],
        )?;
        Ok(())
    }
}
