//! Human-readable statistical explanation attached to a verdict on request.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ThresholdOrigin, TrialConfig};
use crate::early_termination::TerminationReason;
use crate::statistics::{
    one_sided_test, proportion_estimate_with, sample_size_requirement, IntervalMethod,
    OneSidedTestResult, ProportionEstimate, StatisticsError,
};

/// Power assumed when judging whether a sample is large enough.
pub const DEFAULT_POWER: f64 = 0.8;
/// Drop in success rate the sample should be able to detect.
pub const DEFAULT_DETECTABLE_EFFECT: f64 = 0.05;
/// Baselines older than this many days are flagged.
pub const STALE_BASELINE_DAYS: i64 = 30;
/// Expected count below which the normal approximation is unreliable.
const MIN_EXPECTED_COUNT: f64 = 5.0;

/// Something the reader should weigh before trusting the verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Caveat {
    SmallSample { observed: u64, recommended: u64 },
    NormalApproximationUnreliable { expected_successes: f64, expected_failures: f64 },
    EarlyTermination { reason: TerminationReason, executed: u64, planned: u64 },
    PartialEvaluation { executed: u64, planned: u64 },
    CovariateMismatch { key: String, baseline: String, current: String },
    StaleBaseline { age_days: i64 },
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caveat::SmallSample {
                observed,
                recommended,
            } => write!(
                f,
                "sample size too small for the target confidence: {observed} observed, {recommended} recommended"
            ),
            Caveat::NormalApproximationUnreliable {
                expected_successes,
                expected_failures,
            } => write!(
                f,
                "normal approximation unreliable: expected {expected_successes:.1} successes and {expected_failures:.1} failures under the threshold"
            ),
            Caveat::EarlyTermination {
                reason,
                executed,
                planned,
            } => write!(
                f,
                "run stopped early ({reason}) after {executed} of {planned} samples"
            ),
            Caveat::PartialEvaluation { executed, planned } => write!(
                f,
                "budget exhausted: verdict rests on {executed} of {planned} planned samples"
            ),
            Caveat::CovariateMismatch {
                key,
                baseline,
                current,
            } => write!(
                f,
                "covariate mismatch versus baseline: {key} was '{baseline}', now '{current}'"
            ),
            Caveat::StaleBaseline { age_days } => {
                write!(f, "baseline is {age_days} days old")
            }
        }
    }
}

/// H0 and H1 in words, plus the rate they are about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    pub null: String,
    pub alternative: String,
    pub threshold: f64,
    pub origin: ThresholdOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObservedData {
    pub samples: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate: f64,
}

/// The prior measurement the threshold was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineReference {
    pub samples: u64,
    pub successes: u64,
    pub rate: f64,
    pub generated_at: DateTime<Utc>,
    pub derived_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inference {
    pub estimate: ProportionEstimate,
    pub wilson: ProportionEstimate,
    pub test: OneSidedTestResult,
}

/// What the explanation is built from.
#[derive(Debug, Clone, Copy)]
pub struct ExplanationInput<'a> {
    pub config: &'a TrialConfig,
    pub successes: u64,
    pub executed: u64,
    pub reason: TerminationReason,
    pub passed: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticalExplanation {
    pub hypothesis: Hypothesis,
    pub observed: ObservedData,
    pub baseline: Option<BaselineReference>,
    /// Absent when no sample was counted.
    pub inference: Option<Inference>,
    pub interpretation: String,
    pub caveats: Vec<Caveat>,
}

impl StatisticalExplanation {
    pub fn build(input: &ExplanationInput<'_>) -> Result<Self, StatisticsError> {
        let config = input.config;
        let threshold = config.min_pass_rate;
        let n = input.executed;

        let hypothesis = Hypothesis {
            null: format!("true success rate >= {threshold:.4}"),
            alternative: format!("true success rate < {threshold:.4}"),
            threshold,
            origin: config.threshold_origin,
        };

        let rate = if n == 0 {
            0.0
        } else {
            input.successes as f64 / n as f64
        };
        let observed = ObservedData {
            samples: n,
            successes: input.successes,
            failures: n - input.successes.min(n),
            rate,
        };

        let baseline = config.baseline.as_ref().map(|b| BaselineReference {
            samples: b.samples,
            successes: b.successes,
            rate: b.rate().unwrap_or(0.0),
            generated_at: b.generated_at,
            derived_threshold: threshold,
        });

        let inference = if n == 0 {
            None
        } else {
            Some(Inference {
                estimate: proportion_estimate_with(
                    IntervalMethod::Normal,
                    input.successes,
                    n,
                    config.confidence,
                )?,
                wilson: proportion_estimate_with(
                    IntervalMethod::Wilson,
                    input.successes,
                    n,
                    config.confidence,
                )?,
                test: one_sided_test(input.successes, n, threshold)?,
            })
        };

        let caveats = collect_caveats(input)?;
        let interpretation = interpret(input, &observed, inference.as_ref());

        Ok(Self {
            hypothesis,
            observed,
            baseline,
            inference,
            interpretation,
            caveats,
        })
    }

    /// Multi-line rendering for logs and terminals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("H0: {}\n", self.hypothesis.null));
        out.push_str(&format!("H1: {}\n", self.hypothesis.alternative));
        out.push_str(&format!(
            "threshold origin: {}\n",
            self.hypothesis.origin
        ));
        out.push_str(&format!(
            "observed: {}/{} = {:.4}\n",
            self.observed.successes, self.observed.samples, self.observed.rate
        ));
        if let Some(b) = &self.baseline {
            out.push_str(&format!(
                "baseline: {}/{} = {:.4} ({})\n",
                b.successes,
                b.samples,
                b.rate,
                b.generated_at.format("%Y-%m-%d")
            ));
        }
        if let Some(inf) = &self.inference {
            out.push_str(&format!(
                "{:.0}% CI: [{:.4}, {:.4}] (Wilson [{:.4}, {:.4}])\n",
                inf.estimate.confidence() * 100.0,
                inf.estimate.lower(),
                inf.estimate.upper(),
                inf.wilson.lower(),
                inf.wilson.upper()
            ));
            out.push_str(&format!(
                "z = {:.3}, one-sided p = {:.4}\n",
                inf.test.z_statistic, inf.test.p_value
            ));
        }
        out.push_str(&self.interpretation);
        out.push('\n');
        for caveat in &self.caveats {
            out.push_str(&format!("caveat: {caveat}\n"));
        }
        out
    }
}

fn collect_caveats(input: &ExplanationInput<'_>) -> Result<Vec<Caveat>, StatisticsError> {
    let config = input.config;
    let p0 = config.min_pass_rate;
    let n = input.executed;
    let mut caveats = Vec::new();

    let effect_fits = p0 > 0.0 && p0 < 1.0 && p0 - DEFAULT_DETECTABLE_EFFECT > 0.0;
    if effect_fits {
        let requirement = sample_size_requirement(
            config.confidence,
            DEFAULT_POWER,
            DEFAULT_DETECTABLE_EFFECT,
            p0,
            p0 - DEFAULT_DETECTABLE_EFFECT,
        )?;
        if n < requirement.required_samples {
            caveats.push(Caveat::SmallSample {
                observed: n,
                recommended: requirement.required_samples,
            });
        }
    }

    let expected_successes = n as f64 * p0;
    let expected_failures = n as f64 * (1.0 - p0);
    if expected_successes < MIN_EXPECTED_COUNT || expected_failures < MIN_EXPECTED_COUNT {
        caveats.push(Caveat::NormalApproximationUnreliable {
            expected_successes,
            expected_failures,
        });
    }

    if input.reason.is_early() {
        caveats.push(Caveat::EarlyTermination {
            reason: input.reason,
            executed: n,
            planned: config.samples,
        });
    }
    if input.reason == TerminationReason::BudgetExhausted {
        caveats.push(Caveat::PartialEvaluation {
            executed: n,
            planned: config.samples,
        });
    }

    if let Some(baseline) = &config.baseline {
        for (key, was, now) in baseline.covariate_mismatches(&config.covariates) {
            caveats.push(Caveat::CovariateMismatch {
                key: key.to_string(),
                baseline: was.to_string(),
                current: now.to_string(),
            });
        }
        let age_days = baseline.age_days(input.now);
        if age_days > STALE_BASELINE_DAYS {
            caveats.push(Caveat::StaleBaseline { age_days });
        }
    }

    Ok(caveats)
}

fn interpret(
    input: &ExplanationInput<'_>,
    observed: &ObservedData,
    inference: Option<&Inference>,
) -> String {
    let threshold = input.config.min_pass_rate;
    let verdict = if input.passed { "PASS" } else { "FAIL" };
    let comparison = if input.passed {
        "meets"
    } else {
        "falls short of"
    };

    let mut text = format!(
        "{verdict}: observed rate {:.4} ({}/{}) {comparison} the required {threshold:.4}",
        observed.rate, observed.successes, observed.samples
    );

    if let Some(inf) = inference {
        let lower = inf.estimate.lower();
        let upper = inf.estimate.upper();
        let confidence = inf.estimate.confidence() * 100.0;
        if lower >= threshold {
            text.push_str(&format!(
                "; the {confidence:.0}% interval lies entirely above the threshold"
            ));
        } else if upper < threshold {
            text.push_str(&format!(
                "; the {confidence:.0}% interval lies entirely below the threshold"
            ));
        } else {
            text.push_str(&format!(
                "; the {confidence:.0}% interval [{lower:.4}, {upper:.4}] straddles the threshold, so more samples would sharpen the result"
            ));
        }
    } else {
        text.push_str("; no samples were counted");
    }

    match input.reason {
        TerminationReason::Impossibility => {
            text.push_str(". Stopped early: the threshold could no longer be reached")
        }
        TerminationReason::SuccessGuaranteed => {
            text.push_str(". Stopped early: the threshold was already met")
        }
        TerminationReason::BudgetExhausted => text.push_str(". Stopped by budget exhaustion"),
        TerminationReason::Completed | TerminationReason::None => {}
    }
    text.push('.');
    text
}
