//! Reconciler: merges per-source records into canonical entities
//!
//! Merging is field by field against the priority tables in [`policy`].
//! The merged entity is fingerprinted and compared with what is stored, so
//! a re-sync of unchanged upstream data never writes.

pub mod policy;

use crate::store::StoredEntity;
use mtg_common::{CanonicalEntity, EntityKind, FieldMap, IntermediateRecord, SourceId};
use policy::FieldRule;
use std::collections::HashMap;
use thiserror::Error;

/// Why one entity could not be reconciled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("{kind} '{key}': required field '{field}' is missing from every source")]
    MissingRequired {
        kind: EntityKind,
        key: String,
        field: &'static str,
    },

    #[error("{kind} '{key}': {first} and {second} disagree on required field '{field}'")]
    Conflict {
        kind: EntityKind,
        key: String,
        field: &'static str,
        first: SourceId,
        second: SourceId,
    },

    #[error("{kind} '{key}': {message}")]
    Invalid {
        kind: EntityKind,
        key: String,
        message: String,
    },
}

impl ReconcileError {
    pub fn key(&self) -> &str {
        match self {
            ReconcileError::MissingRequired { key, .. }
            | ReconcileError::Conflict { key, .. }
            | ReconcileError::Invalid { key, .. } => key,
        }
    }
}

/// Merge result for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub entity: CanonicalEntity,
    pub fingerprint: String,
    /// True when the entity is new or its content differs from the stored row
    pub changed: bool,
}

/// Field-wise merger driven by static priority tables
pub struct Reconciler {
    rules: HashMap<EntityKind, &'static [FieldRule]>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// Reconciler using the built-in rules for every kind
    pub fn new() -> Self {
        let rules = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, policy::rules_for(kind)))
            .collect();
        Self { rules }
    }

    /// Replace the rules for one kind
    pub fn with_rules(mut self, kind: EntityKind, rules: &'static [FieldRule]) -> Self {
        self.rules.insert(kind, rules);
        self
    }

    /// Merge `incoming` records for one key and diff against `existing`.
    ///
    /// All records must share one kind and key.
    pub fn reconcile(
        &self,
        existing: Option<&StoredEntity>,
        incoming: &[&IntermediateRecord],
    ) -> Result<Reconciled, ReconcileError> {
        let first = incoming.first().ok_or_else(|| ReconcileError::Invalid {
            kind: existing.map(|e| e.entity.kind()).unwrap_or(EntityKind::Set),
            key: existing.map(|e| e.entity.key().to_string()).unwrap_or_default(),
            message: "no source records to reconcile".to_string(),
        })?;
        let (kind, key) = (first.kind, first.key.as_str());
        let invalid = |message: String| ReconcileError::Invalid {
            kind,
            key: key.to_string(),
            message,
        };

        if let Some(stray) = incoming.iter().find(|r| r.kind != kind || r.key != key) {
            return Err(invalid(format!(
                "record from {} belongs to {} '{}'",
                stray.source, stray.kind, stray.key
            )));
        }

        let rules = self.rules.get(&kind).copied().unwrap_or_default();
        let merged = merge_fields(kind, key, rules, incoming)?;

        let entity = CanonicalEntity::from_fields(kind, key, &merged).map_err(|e| invalid(e.to_string()))?;
        let fingerprint = entity
            .fingerprint()
            .map_err(|e| invalid(format!("cannot fingerprint entity: {}", e)))?;

        let changed = match existing {
            None => true,
            Some(stored) => {
                // A stored row whose fingerprint no longer matches its own
                // content is rewritten even if the merge result is identical
                let consistent = stored
                    .entity
                    .fingerprint()
                    .map(|recomputed| recomputed == stored.fingerprint)
                    .unwrap_or(false);
                if !consistent {
                    log::warn!("{} '{}': stored fingerprint is stale, repairing", kind, key);
                }
                !consistent || stored.fingerprint != fingerprint
            }
        };

        Ok(Reconciled {
            entity,
            fingerprint,
            changed,
        })
    }
}

fn merge_fields(
    kind: EntityKind,
    key: &str,
    rules: &[FieldRule],
    incoming: &[&IntermediateRecord],
) -> Result<FieldMap, ReconcileError> {
    let mut merged = FieldMap::new();

    for rule in rules {
        for tier in rule.priority {
            let values: Vec<_> = tier
                .iter()
                .filter_map(|source| {
                    incoming
                        .iter()
                        .find(|r| r.source == *source)
                        .and_then(|r| r.fields.get(rule.field))
                        .map(|value| (*source, value))
                })
                .collect();

            let Some(&(winner, value)) = values.first() else {
                continue;
            };
            if let Some(&(other, _)) = values.iter().find(|(_, v)| *v != value) {
                if rule.required {
                    return Err(ReconcileError::Conflict {
                        kind,
                        key: key.to_string(),
                        field: rule.field,
                        first: winner,
                        second: other,
                    });
                }
                log::warn!(
                    "{} '{}': {} and {} disagree on '{}', keeping {}",
                    kind,
                    key,
                    winner,
                    other,
                    rule.field,
                    winner
                );
            }
            merged.set(rule.field, value.clone());
            break;
        }

        if rule.required && merged.get(rule.field).is_none() {
            return Err(ReconcileError::MissingRequired {
                kind,
                key: key.to_string(),
                field: rule.field,
            });
        }
    }

    Ok(merged)
}
