//! Shared types for MTG catalog synchronization
//!
//! Everything the sync engine and the served data surface agree on lives
//! here: which upstream sources exist, the intermediate record shape every
//! source adapter produces, and the canonical entities that get persisted.

pub mod entity;
pub mod error;
pub mod record;
pub mod source;

pub use entity::{fingerprint_of, CanonicalEntity, Set, SetFlags, SymbolSet, SymbolWatermark};
pub use error::EntityError;
pub use record::{EntityKind, FieldMap, FieldValue, IntermediateRecord};
pub use source::SourceId;
