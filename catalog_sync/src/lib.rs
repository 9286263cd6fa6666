//! Catalog Sync - MTG set and symbol catalog
//!
//! Pulls set metadata from Scryfall and MTGJSON and the symbol manifest from
//! MTG Vectors, reconciles them into canonical entities and keeps them in a
//! SQLite database. Each source is fetched only when its upstream version
//! changed since the last successful sync.

pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod orchestrator;
pub mod reconcile;
pub mod sources;
pub mod store;
pub mod web;

pub use config::{SourceDescriptor, SyncConfig};
pub use error::{Result, SyncError};
pub use fetch::{FetchClient, FetchError, FetchOutcome, RawPayload, VersionToken};
pub use ledger::{SourceVersionRecord, VersionLedger};
pub use orchestrator::report::{SourceSyncOutcome, SyncReport, SyncStatus};
pub use orchestrator::SyncOrchestrator;
pub use reconcile::Reconciler;
pub use store::{open_database, open_in_memory, EntityStore, SqliteStore, StoredEntity};
