//! Sync reports

use super::cycle::CycleStage;
use crate::fetch::VersionToken;
use chrono::{DateTime, Utc};
use mtg_common::{EntityKind, SourceId};
use serde::Serialize;
use std::fmt;

/// How a source's cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Synced recently enough; nothing fetched
    UpToDate,
    /// Upstream unchanged since the recorded version
    NotModified,
    Succeeded,
    /// Some entities failed reconciliation, the rest were committed
    PartiallySucceeded,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::UpToDate => "up to date",
            SyncStatus::NotModified => "not modified",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::PartiallySucceeded => "partially succeeded",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    /// Cycle reached `Done`
    pub fn is_done(&self) -> bool {
        !matches!(self, SyncStatus::Failed | SyncStatus::Cancelled)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity that could not be reconciled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub kind: EntityKind,
    pub key: String,
    pub error: String,
}

/// Result of one source's cycle
#[derive(Debug, Clone, Serialize)]
pub struct SourceSyncOutcome {
    pub source: SourceId,
    pub status: SyncStatus,
    /// Stage the cycle failed in, if it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<CycleStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Records produced by the adapter
    pub records: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<EntityFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_token: Option<VersionToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_version: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl SourceSyncOutcome {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            status: SyncStatus::UpToDate,
            failed_stage: None,
            error: None,
            records: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            failures: Vec::new(),
            version_token: None,
            upstream_version: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    /// Entities written by this cycle
    pub fn changed(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for SourceSyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {:<20}", self.source.as_str(), self.status.as_str())?;
        match self.status {
            SyncStatus::Succeeded | SyncStatus::PartiallySucceeded => {
                write!(
                    f,
                    " {} records: {} created, {} updated, {} unchanged",
                    self.records, self.created, self.updated, self.unchanged
                )?;
                if !self.failures.is_empty() {
                    write!(f, ", {} failed", self.failures.len())?;
                }
            }
            SyncStatus::Failed => {
                if let Some(stage) = self.failed_stage {
                    write!(f, " during {}", stage)?;
                }
                if let Some(error) = &self.error {
                    write!(f, ": {}", error)?;
                }
            }
            _ => {}
        }
        if let Some(version) = &self.upstream_version {
            write!(f, " [upstream {}]", version)?;
        }
        write!(f, " ({} ms)", self.duration_ms)
    }
}

/// Outcome of a sync run over several sources
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<SourceSyncOutcome>,
}

impl SyncReport {
    pub fn outcome(&self, source: SourceId) -> Option<&SourceSyncOutcome> {
        self.outcomes.iter().find(|o| o.source == source)
    }

    /// Entities written across all sources
    pub fn changed(&self) -> usize {
        self.outcomes.iter().map(SourceSyncOutcome::changed).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == SyncStatus::Failed)
    }

    pub fn sources_with(&self, status: SyncStatus) -> Vec<SourceId> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.source)
            .collect()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{}", outcome)?;
            for failure in &outcome.failures {
                writeln!(f, "    {} {}: {}", failure.kind, failure.key, failure.error)?;
            }
        }
        write!(f, "{} entities changed", self.changed())
    }
}
