//! Verdict decision: compare the observed pass rate to the required minimum.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::aggregator::{CriterionSummary, FailureExample, SampleResultAggregator};
use crate::budget::BudgetSnapshot;
use crate::config::{BudgetExhaustedBehavior, ThresholdOrigin, TrialConfig};
use crate::early_termination::{EarlyTerminationEvaluator, TerminationReason};
use crate::explanation::{ExplanationInput, StatisticalExplanation};
use crate::pacing::PacingPlan;
use crate::statistics::{required_successes, StatisticsError};

/// Run-level measurements the decider cannot see in the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUsage {
    pub elapsed_ms: u64,
    pub tokens_used: u64,
    pub pacing: PacingPlan,
    pub budget: Option<BudgetSnapshot>,
}

/// Final pass/fail decision and everything that justifies it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub observed_rate: f64,
    pub required_rate: f64,
    /// Successes needed out of the planned sample count.
    pub required_successes: u64,
    pub threshold_origin: ThresholdOrigin,
    pub termination_reason: TerminationReason,
    /// Why the run stopped, in numbers.
    pub termination_detail: String,
    pub samples_planned: u64,
    pub samples_executed: u64,
    pub successes: u64,
    pub failures: u64,
    pub errors: u64,
    pub ignored: u64,
    pub failure_distribution: BTreeMap<String, u64>,
    pub failure_examples: Vec<FailureExample>,
    pub criteria: Vec<CriterionSummary>,
    pub elapsed_ms: u64,
    pub tokens_used: u64,
    pub pacing: PacingPlan,
    pub budget: Option<BudgetSnapshot>,
    pub config_fingerprint: String,
    pub explanation: Option<StatisticalExplanation>,
}

impl Verdict {
    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed ({:.2}%, required {:.2}%), {}",
            if self.passed { "PASS" } else { "FAIL" },
            self.successes,
            self.samples_executed,
            self.observed_rate * 100.0,
            self.required_rate * 100.0,
            self.termination_detail
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Turns a finished run into a [`Verdict`].
#[derive(Debug, Clone)]
pub struct VerdictDecider<'a> {
    config: &'a TrialConfig,
    evaluator: EarlyTerminationEvaluator,
}

impl<'a> VerdictDecider<'a> {
    pub fn new(config: &'a TrialConfig) -> Self {
        Self {
            config,
            evaluator: EarlyTerminationEvaluator::new(config.samples, config.min_pass_rate),
        }
    }

    /// Pass/fail for `successes` out of `executed` under `reason`.
    ///
    /// The rate comparison uses the same ceiling-rounded success count as
    /// early termination, so stopping early never changes the outcome.
    pub fn passes(&self, successes: u64, executed: u64, reason: TerminationReason) -> bool {
        match reason {
            TerminationReason::Impossibility => false,
            TerminationReason::SuccessGuaranteed => true,
            TerminationReason::BudgetExhausted => match self.config.on_budget_exhausted {
                BudgetExhaustedBehavior::Fail => false,
                BudgetExhaustedBehavior::EvaluatePartial => {
                    self.rate_met(successes, executed)
                }
            },
            TerminationReason::Completed | TerminationReason::None => {
                self.rate_met(successes, executed)
            }
        }
    }

    fn rate_met(&self, successes: u64, executed: u64) -> bool {
        executed > 0 && successes >= required_successes(executed, self.config.min_pass_rate)
    }

    pub fn decide(
        &self,
        aggregator: &SampleResultAggregator,
        reason: TerminationReason,
        usage: RunUsage,
        now: DateTime<Utc>,
    ) -> Result<Verdict, StatisticsError> {
        let successes = aggregator.successes();
        let executed = aggregator.samples_executed();
        let passed = self.passes(successes, executed, reason);

        let explanation = if self.config.explain {
            Some(StatisticalExplanation::build(&ExplanationInput {
                config: self.config,
                successes,
                executed,
                reason,
                passed,
                now,
            })?)
        } else {
            None
        };

        let termination_detail = match reason {
            TerminationReason::Impossibility | TerminationReason::SuccessGuaranteed => {
                self.evaluator.describe(reason, successes, executed)
            }
            TerminationReason::BudgetExhausted => match usage.budget.and_then(|b| b.exhausted_by) {
                Some(exhaustion) => format!(
                    "{:?} budget exhausted ({:?} scope) after {executed} samples",
                    exhaustion.dimension, exhaustion.scope
                ),
                None => format!("budget exhausted after {executed} samples"),
            },
            other => other.to_string(),
        };

        let verdict = Verdict {
            passed,
            observed_rate: aggregator.observed_rate().unwrap_or(0.0),
            required_rate: self.config.min_pass_rate,
            required_successes: self.evaluator.required_successes(),
            threshold_origin: self.config.threshold_origin,
            termination_reason: reason,
            termination_detail,
            samples_planned: self.config.samples,
            samples_executed: executed,
            successes,
            failures: aggregator.failures(),
            errors: aggregator.errors(),
            ignored: aggregator.ignored(),
            failure_distribution: aggregator.failure_distribution().clone(),
            failure_examples: aggregator.examples().to_vec(),
            criteria: aggregator.criterion_summaries(),
            elapsed_ms: usage.elapsed_ms,
            tokens_used: usage.tokens_used,
            pacing: usage.pacing,
            budget: usage.budget,
            config_fingerprint: self.config.fingerprint(),
            explanation,
        };

        info!(
            passed = verdict.passed,
            observed_rate = verdict.observed_rate,
            required_rate = verdict.required_rate,
            executed = verdict.samples_executed,
            reason = %verdict.termination_reason,
            "verdict"
        );
        Ok(verdict)
    }
}
