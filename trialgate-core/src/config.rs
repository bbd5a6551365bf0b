//! Trial configuration.
//!
//! A [`TrialConfig`] is built once per test invocation (usually through
//! [`crate::resolve`]) and is immutable once execution starts. Validation
//! happens before any sample runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::Baseline;
use crate::pacing::PacingConstraints;
use crate::statistics::StatisticsError;

/// Invalid or unreadable configuration. Fails fast, before any sample.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("samples must be at least 1")]
    ZeroSamples,
    #[error("min pass rate must be a number in [0, 1], got {0}")]
    InvalidPassRate(f64),
    #[error("confidence must lie strictly inside (0, 1), got {0}")]
    InvalidConfidence(f64),
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("samples multiplier must be a positive finite number, got {0}")]
    InvalidMultiplier(f64),
    #[error("threshold origin is BASELINE but no baseline was supplied")]
    MissingBaseline,
    #[error("invalid baseline: {0}")]
    InvalidBaseline(String),
    #[error("cannot derive threshold from baseline: {0}")]
    Threshold(#[from] StatisticsError),
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// What happens when the executor raises instead of reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionPolicy {
    /// Record the sample as a failure and keep going.
    #[default]
    FailSample,
    /// Abort the whole run and surface the error.
    Propagate,
    /// Discard the sample and dispatch a replacement.
    Ignore,
}

/// How a budget-exhausted run is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetExhaustedBehavior {
    /// Always fail, whatever the partial rate.
    #[default]
    Fail,
    /// Compare the rate over completed samples to the threshold.
    EvaluatePartial,
}

/// Where the minimum pass rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdOrigin {
    /// Hand-specified constant.
    #[default]
    Explicit,
    /// Derived from a prior baseline measurement.
    Baseline,
    /// Contractual service level agreement.
    Sla,
    /// Internal service level objective.
    Slo,
    /// Organisational policy.
    Policy,
}

/// How token cost is charged per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenCharge {
    /// Fixed charge per sample, known before dispatch.
    Static { per_sample: u64 },
    /// Whatever the executor reports in its result.
    Dynamic,
}

impl Default for TokenCharge {
    fn default() -> Self {
        TokenCharge::Static { per_sample: 0 }
    }
}

macro_rules! lenient_from_str {
    ($ty:ty, $what:literal, { $($label:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
                match normalized.as_str() {
                    $($label => Ok($variant),)+
                    _ => Err(format!("unknown {} '{}'", $what, s)),
                }
            }
        }
    };
}

lenient_from_str!(ExceptionPolicy, "exception policy", {
    "FAIL_SAMPLE" => ExceptionPolicy::FailSample,
    "PROPAGATE" => ExceptionPolicy::Propagate,
    "IGNORE" => ExceptionPolicy::Ignore,
});

lenient_from_str!(BudgetExhaustedBehavior, "budget behavior", {
    "FAIL" => BudgetExhaustedBehavior::Fail,
    "EVALUATE_PARTIAL" => BudgetExhaustedBehavior::EvaluatePartial,
});

lenient_from_str!(ThresholdOrigin, "threshold origin", {
    "EXPLICIT" => ThresholdOrigin::Explicit,
    "BASELINE" => ThresholdOrigin::Baseline,
    "SLA" => ThresholdOrigin::Sla,
    "SLO" => ThresholdOrigin::Slo,
    "POLICY" => ThresholdOrigin::Policy,
});

impl fmt::Display for ThresholdOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThresholdOrigin::Explicit => "explicit",
            ThresholdOrigin::Baseline => "baseline",
            ThresholdOrigin::Sla => "SLA",
            ThresholdOrigin::Slo => "SLO",
            ThresholdOrigin::Policy => "policy",
        };
        f.write_str(label)
    }
}

/// Complete configuration for one trial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Samples planned (at least 1).
    pub samples: u64,
    /// Minimum required pass rate in [0, 1].
    pub min_pass_rate: f64,
    pub threshold_origin: ThresholdOrigin,
    /// Prior measurement the threshold refers to, if any.
    pub baseline: Option<Baseline>,
    /// Wall-clock budget in milliseconds; 0 = unlimited.
    pub time_budget_ms: u64,
    /// Token budget; 0 = unlimited.
    pub token_budget: u64,
    pub token_charge: TokenCharge,
    pub max_concurrency: usize,
    pub pacing: PacingConstraints,
    pub on_exception: ExceptionPolicy,
    pub on_budget_exhausted: BudgetExhaustedBehavior,
    /// Failing samples retained verbatim for reports.
    pub max_example_failures: usize,
    /// Replacement dispatches allowed under IGNORE; `None` = `samples`.
    pub max_ignored_retries: Option<u64>,
    /// Stop once the verdict is decided.
    pub early_termination: bool,
    /// Confidence level for intervals in explanations.
    pub confidence: f64,
    /// Build a statistical explanation with the verdict.
    pub explain: bool,
    /// Conditions this run executes under, compared against the baseline.
    pub covariates: BTreeMap<String, String>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            samples: 100,
            min_pass_rate: 0.95,
            threshold_origin: ThresholdOrigin::Explicit,
            baseline: None,
            time_budget_ms: 0,
            token_budget: 0,
            token_charge: TokenCharge::default(),
            max_concurrency: 1,
            pacing: PacingConstraints::default(),
            on_exception: ExceptionPolicy::FailSample,
            on_budget_exhausted: BudgetExhaustedBehavior::Fail,
            max_example_failures: 10,
            max_ignored_retries: None,
            early_termination: true,
            confidence: 0.95,
            explain: false,
            covariates: BTreeMap::new(),
        }
    }
}

impl TrialConfig {
    /// Reject configurations that cannot run. Called before any sample.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        if !(0.0..=1.0).contains(&self.min_pass_rate) {
            return Err(ConfigError::InvalidPassRate(self.min_pass_rate));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::InvalidConfidence(self.confidence));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.threshold_origin == ThresholdOrigin::Baseline && self.baseline.is_none() {
            return Err(ConfigError::MissingBaseline);
        }
        if let Some(baseline) = &self.baseline {
            if baseline.samples == 0 {
                return Err(ConfigError::InvalidBaseline("zero samples".into()));
            }
            if baseline.successes > baseline.samples {
                return Err(ConfigError::InvalidBaseline(format!(
                    "{} successes out of {} samples",
                    baseline.successes, baseline.samples
                )));
            }
        }
        Ok(())
    }

    /// Set the threshold to the baseline's one-sided Wilson lower bound at
    /// this config's confidence.
    pub fn with_baseline_threshold(mut self, baseline: Baseline) -> Result<Self, ConfigError> {
        let derived = baseline.derive_threshold(self.confidence)?;
        self.min_pass_rate = derived.min_pass_rate;
        self.threshold_origin = ThresholdOrigin::Baseline;
        self.baseline = Some(baseline);
        Ok(self)
    }

    /// Cap on replacement dispatches under the IGNORE policy.
    pub fn ignored_retry_cap(&self) -> u64 {
        self.max_ignored_retries.unwrap_or(self.samples)
    }

    /// Static per-sample token charge, if any.
    pub fn static_token_charge(&self) -> Option<u64> {
        match self.token_charge {
            TokenCharge::Static { per_sample } if per_sample > 0 => Some(per_sample),
            _ => None,
        }
    }

    /// Deterministic content hash (BLAKE3 hex) of this configuration.
    ///
    /// Two runs with identical configs share a fingerprint, which lets
    /// reporting layers group repeated runs.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn default_is_valid() {
        assert!(TrialConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_samples_rejected() {
        let config = TrialConfig {
            samples: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSamples)));
    }

    #[test]
    fn pass_rate_out_of_range_rejected() {
        for rate in [-0.1, 1.1, f64::NAN] {
            let config = TrialConfig {
                min_pass_rate: rate,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidPassRate(_))),
                "rate = {rate}"
            );
        }
    }

    #[test]
    fn confidence_out_of_range_rejected() {
        for confidence in [0.0, 1.0, f64::NAN] {
            let config = TrialConfig {
                confidence,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidConfidence(_))
            ));
        }
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = TrialConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));
    }

    #[test]
    fn baseline_origin_requires_baseline() {
        let config = TrialConfig {
            threshold_origin: ThresholdOrigin::Baseline,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingBaseline)));
    }

    #[test]
    fn baseline_threshold_applied() {
        let baseline = Baseline::new(500, 480, Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap());
        let config = TrialConfig::default()
            .with_baseline_threshold(baseline)
            .unwrap();
        assert_eq!(config.threshold_origin, ThresholdOrigin::Baseline);
        assert!(config.min_pass_rate < 0.96 && config.min_pass_rate > 0.9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn policies_parse_leniently() {
        assert_eq!(
            "fail-sample".parse::<ExceptionPolicy>(),
            Ok(ExceptionPolicy::FailSample)
        );
        assert_eq!("PROPAGATE".parse::<ExceptionPolicy>(), Ok(ExceptionPolicy::Propagate));
        assert_eq!(
            "evaluate_partial".parse::<BudgetExhaustedBehavior>(),
            Ok(BudgetExhaustedBehavior::EvaluatePartial)
        );
        assert_eq!("slo".parse::<ThresholdOrigin>(), Ok(ThresholdOrigin::Slo));
        assert!("sometimes".parse::<ExceptionPolicy>().is_err());
    }

    #[test]
    fn fingerprint_deterministic_and_sensitive() {
        let a = TrialConfig::default();
        let b = TrialConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = TrialConfig {
            samples: 101,
            ..Default::default()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn static_token_charge() {
        assert_eq!(TrialConfig::default().static_token_charge(), None);
        let config = TrialConfig {
            token_charge: TokenCharge::Static { per_sample: 25 },
            ..Default::default()
        };
        assert_eq!(config.static_token_charge(), Some(25));
        let config = TrialConfig {
            token_charge: TokenCharge::Dynamic,
            ..Default::default()
        };
        assert_eq!(config.static_token_charge(), None);
    }

    #[test]
    fn config_serialization() {
        let config = TrialConfig {
            samples: 40,
            min_pass_rate: 0.75,
            token_charge: TokenCharge::Dynamic,
            on_exception: ExceptionPolicy::Ignore,
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let decoded: TrialConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: TrialConfig = toml::from_str(
            r#"
            samples = 20
            min_pass_rate = 0.9
            on_exception = "IGNORE"

            [pacing]
            max_per_minute = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.samples, 20);
        assert_eq!(config.on_exception, ExceptionPolicy::Ignore);
        assert_eq!(config.pacing.max_per_minute, 30);
        assert_eq!(config.max_concurrency, 1);
        assert!(config.early_termination);
    }
}
