//! Intermediate records produced by source adapters

use crate::error::EntityError;
use crate::source::SourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical entity types persisted by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Set,
    SymbolSet,
    SymbolWatermark,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Set,
        EntityKind::SymbolSet,
        EntityKind::SymbolWatermark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Set => "set",
            EntityKind::SymbolSet => "symbol_set",
            EntityKind::SymbolWatermark => "symbol_watermark",
        }
    }

    /// Sources that contribute records of this kind
    pub fn sources(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|s| s.entity_kinds().contains(self))
            .collect()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "set" | "sets" => Ok(EntityKind::Set),
            "symbol_set" => Ok(EntityKind::SymbolSet),
            "symbol_watermark" | "watermark" => Ok(EntityKind::SymbolWatermark),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// A single raw field value as reported by an upstream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Null and blank text count as "not supplied" during merging.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Canonical field name → value, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, FieldValue>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; empty values are dropped so "absent" has one spelling.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        if value.is_empty() {
            self.0.remove(field);
        } else {
            self.0.insert(field.to_string(), value);
        }
    }

    /// Builder-style variant of [`FieldMap::set`]
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Present, non-empty value for `field`
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field).filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn text(&self, field: &str) -> Result<Option<String>, EntityError> {
        match self.get(field) {
            None => Ok(None),
            Some(FieldValue::Text(s)) => Ok(Some(s.clone())),
            Some(other) => Err(type_error(field, "text", other)),
        }
    }

    pub fn int(&self, field: &str) -> Result<Option<i64>, EntityError> {
        match self.get(field) {
            None => Ok(None),
            Some(FieldValue::Int(n)) => Ok(Some(*n)),
            Some(other) => Err(type_error(field, "int", other)),
        }
    }

    pub fn bool(&self, field: &str) -> Result<Option<bool>, EntityError> {
        match self.get(field) {
            None => Ok(None),
            Some(FieldValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(field, "bool", other)),
        }
    }

    pub fn list(&self, field: &str) -> Result<Option<Vec<String>>, EntityError> {
        match self.get(field) {
            None => Ok(None),
            Some(FieldValue::List(items)) => Ok(Some(items.clone())),
            Some(other) => Err(type_error(field, "list", other)),
        }
    }

    /// Text value that must be present
    pub fn required_text(&self, field: &str) -> Result<String, EntityError> {
        self.text(field)?
            .ok_or_else(|| EntityError::MissingField(field.to_string()))
    }
}

fn type_error(field: &str, expected: &'static str, found: &FieldValue) -> EntityError {
    EntityError::FieldType {
        field: field.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// One source's view of one logical entity, before any cross-source merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateRecord {
    pub source: SourceId,
    pub kind: EntityKind,
    pub key: String,
    pub fields: FieldMap,
}

impl IntermediateRecord {
    pub fn new(source: SourceId, kind: EntityKind, key: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            source,
            kind,
            key: key.into(),
            fields,
        }
    }
}
