//! Errors raised while building canonical entities from merged fields

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// A field the entity cannot exist without
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// A field holds a value of the wrong shape
    #[error("field '{field}' expected {expected}, found {found}")]
    FieldType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}
