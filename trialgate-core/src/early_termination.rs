//! Early termination: stop once the verdict is mathematically decided.
//!
//! Two deterministic rules, both lossless with respect to running every
//! planned sample:
//! - **Impossibility:** even if every remaining sample succeeds, the success
//!   count cannot reach the required threshold.
//! - **Success guaranteed:** the threshold is already met, so no sequence of
//!   remaining outcomes can bring the rate below it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::statistics::required_successes;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    #[default]
    None,
    Completed,
    Impossibility,
    SuccessGuaranteed,
    BudgetExhausted,
}

impl TerminationReason {
    /// True for the two early-termination rules.
    pub fn is_early(&self) -> bool {
        matches!(
            self,
            TerminationReason::Impossibility | TerminationReason::SuccessGuaranteed
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::None => "not terminated",
            TerminationReason::Completed => "all samples completed",
            TerminationReason::Impossibility => "threshold unreachable",
            TerminationReason::SuccessGuaranteed => "threshold already met",
            TerminationReason::BudgetExhausted => "budget exhausted",
        };
        f.write_str(label)
    }
}

/// Decides whether continuing is pointless or already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyTerminationEvaluator {
    total_samples: u64,
    required_successes: u64,
}

impl EarlyTerminationEvaluator {
    pub fn new(total_samples: u64, min_pass_rate: f64) -> Self {
        Self {
            total_samples,
            required_successes: required_successes(total_samples, min_pass_rate),
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn required_successes(&self) -> u64 {
        self.required_successes
    }

    /// Best achievable success count if every remaining sample succeeds.
    pub fn max_possible(&self, successes_so_far: u64, samples_executed: u64) -> u64 {
        let remaining = self.total_samples.saturating_sub(samples_executed);
        successes_so_far.saturating_add(remaining)
    }

    pub fn evaluate(
        &self,
        successes_so_far: u64,
        samples_executed: u64,
    ) -> Option<TerminationReason> {
        if successes_so_far >= self.required_successes && samples_executed < self.total_samples {
            return Some(TerminationReason::SuccessGuaranteed);
        }
        if self.max_possible(successes_so_far, samples_executed) < self.required_successes {
            return Some(TerminationReason::Impossibility);
        }
        None
    }

    /// One-line account of why `reason` fired at this point.
    pub fn describe(
        &self,
        reason: TerminationReason,
        successes_so_far: u64,
        samples_executed: u64,
    ) -> String {
        match reason {
            TerminationReason::SuccessGuaranteed => format!(
                "{successes_so_far} successes after {samples_executed} of {} samples already meet the {} required",
                self.total_samples, self.required_successes
            ),
            TerminationReason::Impossibility => format!(
                "{successes_so_far} successes + {} remaining = {} < {} required",
                self.total_samples.saturating_sub(samples_executed),
                self.max_possible(successes_so_far, samples_executed),
                self.required_successes
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_guaranteed_after_required_reached() {
        // 10 samples at 0.8 -> 8 required
        let eval = EarlyTerminationEvaluator::new(10, 0.8);
        assert_eq!(eval.required_successes(), 8);
        for k in 1..8 {
            assert_eq!(eval.evaluate(k, k), None, "k = {k}");
        }
        assert_eq!(eval.evaluate(8, 8), Some(TerminationReason::SuccessGuaranteed));
    }

    #[test]
    fn no_success_guaranteed_on_natural_completion() {
        let eval = EarlyTerminationEvaluator::new(10, 0.8);
        assert_eq!(eval.evaluate(10, 10), None);
        assert_eq!(eval.evaluate(8, 10), None);
    }

    #[test]
    fn impossibility_after_too_many_failures() {
        // 100 samples at 0.95 -> 95 required; 6 failures leave max 94
        let eval = EarlyTerminationEvaluator::new(100, 0.95);
        assert_eq!(eval.evaluate(0, 5), None);
        assert_eq!(eval.evaluate(0, 6), Some(TerminationReason::Impossibility));
        assert_eq!(eval.max_possible(0, 6), 94);
    }

    #[test]
    fn perfect_rate_fails_on_first_failure() {
        let eval = EarlyTerminationEvaluator::new(5, 1.0);
        assert_eq!(eval.evaluate(0, 1), Some(TerminationReason::Impossibility));
    }

    #[test]
    fn impossibility_reported_at_completion_too() {
        let eval = EarlyTerminationEvaluator::new(10, 0.8);
        assert_eq!(eval.evaluate(7, 10), Some(TerminationReason::Impossibility));
    }

    #[test]
    fn nan_rate_never_guarantees_success() {
        let eval = EarlyTerminationEvaluator::new(10, f64::NAN);
        assert_eq!(eval.evaluate(5, 5), None);
        assert_eq!(eval.evaluate(9, 9), Some(TerminationReason::Impossibility));
    }

    #[test]
    fn describe_mentions_counts() {
        let eval = EarlyTerminationEvaluator::new(100, 0.95);
        let text = eval.describe(TerminationReason::Impossibility, 0, 6);
        assert_eq!(text, "0 successes + 94 remaining = 94 < 95 required");
    }

    #[test]
    fn early_reasons() {
        assert!(TerminationReason::Impossibility.is_early());
        assert!(TerminationReason::SuccessGuaranteed.is_early());
        assert!(!TerminationReason::Completed.is_early());
        assert!(!TerminationReason::BudgetExhausted.is_early());
    }
}
