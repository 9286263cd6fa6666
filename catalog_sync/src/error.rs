//! Error types for catalog_sync

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::reconcile::ReconcileError;
use crate::sources::ParseError;
use crate::store::StoreError;
use thiserror::Error;

/// Unified error type for catalog_sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration, fatal at startup
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Store or ledger unavailable
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("source '{0}' is not configured")]
    UnknownSource(mtg_common::SourceId),

    #[error("sync cancelled")]
    Cancelled,
}

/// Result alias for catalog_sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
