//! Sample result aggregation: counts, failure distribution, retained
//! failure examples, and per-criterion pass rates.
//!
//! Completions may arrive out of issue order under concurrency; nothing here
//! assumes sample `i` is recorded before sample `i + 1`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outcome::{CriterionResult, SampleOutcome};

/// A retained failing sample, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureExample {
    /// 0-based issue index.
    pub index: u64,
    pub outcome: SampleOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CriterionTally {
    passed: u64,
    total: u64,
}

/// Pass rate of one named criterion across recorded samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSummary {
    pub name: String,
    pub passed: u64,
    pub total: u64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleResultAggregator {
    max_examples: usize,
    samples_executed: u64,
    successes: u64,
    failures: u64,
    errors: u64,
    ignored: u64,
    failure_distribution: BTreeMap<String, u64>,
    examples: Vec<FailureExample>,
    criteria: BTreeMap<String, CriterionTally>,
}

impl SampleResultAggregator {
    pub fn new(max_examples: usize) -> Self {
        Self {
            max_examples,
            ..Default::default()
        }
    }

    /// Record a counted sample.
    pub fn record(&mut self, index: u64, outcome: &SampleOutcome, criteria: &[CriterionResult]) {
        self.samples_executed += 1;
        match outcome {
            SampleOutcome::Success => self.successes += 1,
            SampleOutcome::Failure { .. } => self.failures += 1,
            SampleOutcome::Errored { .. } => {
                self.failures += 1;
                self.errors += 1;
            }
        }

        if let Some(key) = outcome.failure_key() {
            *self.failure_distribution.entry(key).or_insert(0) += 1;
            if self.examples.len() < self.max_examples {
                self.examples.push(FailureExample {
                    index,
                    outcome: outcome.clone(),
                });
            }
        }

        for criterion in criteria {
            let tally = self.criteria.entry(criterion.name.clone()).or_default();
            tally.total += 1;
            if criterion.passed {
                tally.passed += 1;
            }
        }
    }

    /// Note a discarded sample (IGNORE policy). Does not touch the tallies.
    pub fn record_ignored(&mut self) {
        self.ignored += 1;
    }

    pub fn samples_executed(&self) -> u64 {
        self.samples_executed
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Failures including errored samples.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    /// Observed success rate; `None` before any sample is recorded.
    pub fn observed_rate(&self) -> Option<f64> {
        (self.samples_executed > 0).then(|| self.successes as f64 / self.samples_executed as f64)
    }

    pub fn failure_distribution(&self) -> &BTreeMap<String, u64> {
        &self.failure_distribution
    }

    pub fn examples(&self) -> &[FailureExample] {
        &self.examples
    }

    pub fn criterion_summaries(&self) -> Vec<CriterionSummary> {
        self.criteria
            .iter()
            .map(|(name, tally)| CriterionSummary {
                name: name.clone(),
                passed: tally.passed,
                total: tally.total,
                pass_rate: if tally.total == 0 {
                    0.0
                } else {
                    tally.passed as f64 / tally.total as f64
                },
            })
            .collect()
    }
}
