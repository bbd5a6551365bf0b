//! TrialGate Core — statistics, planning, and verdicts for probabilistic trials.
//!
//! This crate holds everything the sample loop needs that does not run samples:
//! - Binomial proportion inference (intervals, one-sided test, sample size)
//! - Pacing plans from rate-limit constraints
//! - Hierarchical time/token budgets
//! - Lossless early-termination rules
//! - Result aggregation and the final verdict with optional explanation
//! - Trial configuration, layered resolution, and baseline-derived thresholds

pub mod aggregator;
pub mod baseline;
pub mod budget;
pub mod config;
pub mod early_termination;
pub mod explanation;
pub mod outcome;
pub mod pacing;
pub mod resolve;
pub mod statistics;
pub mod verdict;

pub use aggregator::{CriterionSummary, FailureExample, SampleResultAggregator};
pub use baseline::{Baseline, DerivedThreshold};
pub use budget::{BudgetLimits, BudgetScope, BudgetSnapshot, BudgetTracker};
pub use config::{
    BudgetExhaustedBehavior, ConfigError, ExceptionPolicy, ThresholdOrigin, TokenCharge,
    TrialConfig,
};
pub use early_termination::{EarlyTerminationEvaluator, TerminationReason};
pub use explanation::{Caveat, StatisticalExplanation};
pub use outcome::{CriterionResult, SampleError, SampleOutcome, SampleResult};
pub use pacing::{PacingConstraints, PacingPlan, PacingWarning};
pub use resolve::{resolve, ConfigLayers, PartialTrialConfig};
pub use statistics::{ProportionEstimate, StatisticsError};
pub use verdict::{RunUsage, Verdict, VerdictDecider};
