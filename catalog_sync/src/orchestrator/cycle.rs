//! Per-source cycle state machine

use mtg_common::SourceId;
use serde::Serialize;
use std::fmt;

/// Stage of one source's sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Idle,
    CheckingVersion,
    Fetching,
    Parsing,
    Reconciling,
    Persisting,
    Done,
    Failed,
}

impl CycleStage {
    /// Whether `next` may follow `self`.
    ///
    /// The happy path runs straight through; `CheckingVersion -> Done` (up
    /// to date) and `Fetching -> Done` (not modified) short-circuit, and any
    /// working stage may fail.
    pub fn can_transition(self, next: CycleStage) -> bool {
        use CycleStage::*;
        matches!(
            (self, next),
            (Idle, CheckingVersion)
                | (CheckingVersion, Fetching)
                | (CheckingVersion, Done)
                | (Fetching, Parsing)
                | (Fetching, Done)
                | (Parsing, Reconciling)
                | (Reconciling, Persisting)
                | (Persisting, Done)
                | (CheckingVersion, Failed)
                | (Fetching, Failed)
                | (Parsing, Failed)
                | (Reconciling, Failed)
                | (Persisting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CycleStage::Done | CycleStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleStage::Idle => "idle",
            CycleStage::CheckingVersion => "checking_version",
            CycleStage::Fetching => "fetching",
            CycleStage::Parsing => "parsing",
            CycleStage::Reconciling => "reconciling",
            CycleStage::Persisting => "persisting",
            CycleStage::Done => "done",
            CycleStage::Failed => "failed",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks where a running cycle is
#[derive(Debug)]
pub struct Cycle {
    source: SourceId,
    stage: CycleStage,
}

impl Cycle {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            stage: CycleStage::Idle,
        }
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    pub fn advance(&mut self, next: CycleStage) {
        debug_assert!(
            self.stage.can_transition(next),
            "illegal cycle transition {} -> {}",
            self.stage,
            next
        );
        log::debug!("{}: {} -> {}", self.source, self.stage, next);
        self.stage = next;
    }

    /// Move to `Failed`, returning the stage the failure happened in
    pub fn fail(&mut self) -> CycleStage {
        let failed_in = self.stage;
        if !self.stage.is_terminal() && self.stage != CycleStage::Idle {
            self.advance(CycleStage::Failed);
        } else {
            self.stage = CycleStage::Failed;
        }
        failed_in
    }
}
