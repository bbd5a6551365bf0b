//! Baselines: prior empirical measurements used to derive thresholds.
//!
//! Loading and persisting baselines is the caller's business; this module
//! only turns a measurement into a statistically justified minimum pass rate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::statistics::{wilson_lower_bound, StatisticsError};

/// A prior measurement of the procedure under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub samples: u64,
    pub successes: u64,
    pub generated_at: DateTime<Utc>,
    /// Conditions the baseline was measured under (model, region, ...).
    #[serde(default)]
    pub covariates: BTreeMap<String, String>,
}

/// Threshold derived from a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedThreshold {
    pub min_pass_rate: f64,
    pub baseline_rate: f64,
    pub confidence: f64,
}

impl Baseline {
    pub fn new(samples: u64, successes: u64, generated_at: DateTime<Utc>) -> Self {
        Self {
            samples,
            successes,
            generated_at,
            covariates: BTreeMap::new(),
        }
    }

    pub fn with_covariate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.covariates.insert(key.into(), value.into());
        self
    }

    /// Observed success rate of the baseline; `None` for an empty baseline.
    pub fn rate(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.successes as f64 / self.samples as f64)
    }

    /// Minimum pass rate: one-sided Wilson lower bound of the baseline rate.
    ///
    /// At 95% confidence, a system performing as well as the baseline clears
    /// this threshold 95% of the time.
    pub fn derive_threshold(&self, confidence: f64) -> Result<DerivedThreshold, StatisticsError> {
        let min_pass_rate = wilson_lower_bound(self.successes, self.samples, confidence)?;
        Ok(DerivedThreshold {
            min_pass_rate,
            baseline_rate: self.successes as f64 / self.samples as f64,
            confidence,
        })
    }

    /// Whole days elapsed since the baseline was generated.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.generated_at).num_days()
    }

    /// Covariates whose values differ from `current`, as
    /// `(key, baseline value, current value)`. Keys missing on one side are
    /// not mismatches.
    pub fn covariate_mismatches<'a>(
        &'a self,
        current: &'a BTreeMap<String, String>,
    ) -> Vec<(&'a str, &'a str, &'a str)> {
        self.covariates
            .iter()
            .filter_map(|(key, baseline_value)| {
                current
                    .get(key)
                    .filter(|value| *value != baseline_value)
                    .map(|value| (key.as_str(), baseline_value.as_str(), value.as_str()))
            })
            .collect()
    }
}
