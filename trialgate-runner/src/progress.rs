//! Run phases and progress snapshots for reporting layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use trialgate_core::early_termination::TerminationReason;

/// Runner state machine.
///
/// `NotStarted -> Running -> {Completed | TerminatedEarly | BudgetExhausted}
/// -> VerdictReady`. An aborted run (PROPAGATE) never reaches `VerdictReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    #[default]
    NotStarted,
    Running,
    Completed,
    TerminatedEarly,
    BudgetExhausted,
    VerdictReady,
}

impl RunPhase {
    /// Phase a run stops in for a given termination reason.
    pub fn stopped_by(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::Impossibility | TerminationReason::SuccessGuaranteed => {
                RunPhase::TerminatedEarly
            }
            TerminationReason::BudgetExhausted => RunPhase::BudgetExhausted,
            TerminationReason::Completed | TerminationReason::None => RunPhase::Completed,
        }
    }

    /// Whether `next` is a legal successor.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (NotStarted, Running)
                | (Running, Completed)
                | (Running, TerminatedEarly)
                | (Running, BudgetExhausted)
                | (Completed, VerdictReady)
                | (TerminatedEarly, VerdictReady)
                | (BudgetExhausted, VerdictReady)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::NotStarted => "not started",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::TerminatedEarly => "terminated early",
            RunPhase::BudgetExhausted => "budget exhausted",
            RunPhase::VerdictReady => "verdict ready",
        };
        f.write_str(label)
    }
}

/// Progress update sent after each sample is recorded or discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialProgress {
    pub phase: RunPhase,
    pub samples_planned: u64,
    pub samples_executed: u64,
    pub successes: u64,
    pub failures: u64,
    pub ignored: u64,
    pub in_flight: usize,
    pub tokens_used: u64,
    pub elapsed_ms: u64,
    pub termination_reason: TerminationReason,
}

impl TrialProgress {
    /// Fraction of planned samples counted so far, in [0, 1].
    pub fn fraction_complete(&self) -> f64 {
        if self.samples_planned == 0 {
            return 0.0;
        }
        (self.samples_executed as f64 / self.samples_planned as f64).min(1.0)
    }

    /// Success rate so far; `None` before the first counted sample.
    pub fn observed_rate(&self) -> Option<f64> {
        (self.samples_executed > 0).then(|| self.successes as f64 / self.samples_executed as f64)
    }
}
