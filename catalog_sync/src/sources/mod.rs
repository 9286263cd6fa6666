//! Source adapters
//!
//! Each upstream gets one module that turns its raw payload into
//! [`IntermediateRecord`]s under canonical field names. Adapters are pure
//! functions of the payload bytes and reject a payload as a whole: either
//! every record parses or none is returned.

pub mod mtgjson;
pub mod scryfall;
pub mod vectors;

use chrono::NaiveDate;
use mtg_common::{EntityKind, IntermediateRecord, SourceId};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use thiserror::Error;

/// Why a payload was rejected
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{source_id}: payload is not valid JSON for this source: {message}")]
    Malformed { source_id: SourceId, message: String },

    #[error("{source_id}: unexpected payload envelope: {message}")]
    Envelope { source_id: SourceId, message: String },

    #[error("{source_id}: record '{key}' is missing required field '{field}'")]
    MissingField {
        source_id: SourceId,
        key: String,
        field: &'static str,
    },

    #[error("{source_id}: record '{key}' has malformed date '{value}'")]
    InvalidDate {
        source_id: SourceId,
        key: String,
        value: String,
    },

    #[error("{source_id}: duplicate {kind} key '{key}' in one payload")]
    DuplicateKey {
        source_id: SourceId,
        kind: EntityKind,
        key: String,
    },
}

/// Records extracted from one payload
#[derive(Debug, Clone, Default)]
pub struct ParsedPayload {
    pub records: Vec<IntermediateRecord>,
    /// Version string the upstream publishes alongside its data, if any
    pub upstream_version: Option<String>,
}

impl ParsedPayload {
    pub fn count(&self, kind: EntityKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

/// Parse a payload with the adapter for `source`
pub fn parse(source: SourceId, body: &[u8]) -> Result<ParsedPayload, ParseError> {
    let parsed = match source {
        SourceId::Scryfall => scryfall::parse(body)?,
        SourceId::Mtgjson => mtgjson::parse(body)?,
        SourceId::Vectors => vectors::parse(body)?,
    };
    log::debug!(
        "{}: parsed {} records (upstream version {:?})",
        source,
        parsed.records.len(),
        parsed.upstream_version
    );
    Ok(parsed)
}

fn decode<T: DeserializeOwned>(source_id: SourceId, body: &[u8]) -> Result<T, ParseError> {
    serde_json::from_slice(body).map_err(|e| ParseError::Malformed {
        source_id,
        message: e.to_string(),
    })
}

fn require<T>(
    value: Option<T>,
    source_id: SourceId,
    key: &str,
    field: &'static str,
) -> Result<T, ParseError> {
    value.ok_or_else(|| ParseError::MissingField {
        source_id,
        key: key.to_string(),
        field,
    })
}

/// Validate a `YYYY-MM-DD` date, passing absent values through
fn check_date(source_id: SourceId, key: &str, value: Option<String>) -> Result<Option<String>, ParseError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        Ok(date) => Ok(Some(date.format("%Y-%m-%d").to_string())),
        Err(_) => Err(ParseError::InvalidDate {
            source_id,
            key: key.to_string(),
            value,
        }),
    }
}

/// Collects records while rejecting duplicate keys per entity kind
struct RecordSink {
    source_id: SourceId,
    seen: HashSet<(EntityKind, String)>,
    records: Vec<IntermediateRecord>,
}

impl RecordSink {
    fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            seen: HashSet::new(),
            records: Vec::new(),
        }
    }

    fn push(&mut self, record: IntermediateRecord) -> Result<(), ParseError> {
        if !self.seen.insert((record.kind, record.key.clone())) {
            return Err(ParseError::DuplicateKey {
                source_id: self.source_id,
                kind: record.kind,
                key: record.key,
            });
        }
        self.records.push(record);
        Ok(())
    }

    fn finish(self, upstream_version: Option<String>) -> ParsedPayload {
        ParsedPayload {
            records: self.records,
            upstream_version,
        }
    }
}
