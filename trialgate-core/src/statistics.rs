//! Binomial proportion inference for pass/fail verdicts.
//!
//! Implements from first principles:
//! - Standard normal CDF (Chebyshev-fitted complementary error function)
//! - Standard normal quantile (Acklam's rational approximation)
//! - Proportion point estimate with a two-sided confidence interval
//!   (normal approximation or Wilson score)
//! - One-sided Wilson lower bound, used to derive thresholds from baselines
//! - One-sided z-test of an observed rate against a null rate
//! - Required successes (ceiling rounding) and sample-size requirements
//!
//! Only the one-sided binomial machinery needed to decide "does the observed
//! rate meet the required minimum" lives here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Absolute slack applied before ceiling `n * rate`, so that products such as
/// `100 * 0.07 = 7.000000000000001` do not round up to an extra success.
const ROUNDING_TOLERANCE: f64 = 1e-9;

/// Invalid inputs to an inference function. Always a programming error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatisticsError {
    #[error("sample size must be positive")]
    ZeroSamples,
    #[error("successes ({successes}) exceed sample size ({n})")]
    SuccessesExceedSamples { successes: u64, n: u64 },
    #[error("{name} must lie strictly inside (0, 1), got {value}")]
    OutsideOpenUnitInterval { name: &'static str, value: f64 },
    #[error("{name} must lie inside [0, 1], got {value}")]
    OutsideUnitInterval { name: &'static str, value: f64 },
    #[error("alternative rate {alt_rate} must be below null rate {null_rate}")]
    NonPositiveEffect { null_rate: f64, alt_rate: f64 },
}

// ─── Math primitives ─────────────────────────────────────────────────

/// Complementary error function, fractional error below 1.2e-7 everywhere.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    #[allow(clippy::excessive_precision)]
    let ans = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Standard normal CDF: P(Z <= x).
pub fn normal_cdf(x: f64) -> f64 {
    if x == f64::INFINITY {
        return 1.0;
    }
    if x == f64::NEG_INFINITY {
        return 0.0;
    }
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile (inverse CDF), relative error about 1.15e-9.
///
/// Returns -inf for p <= 0 and +inf for p >= 1; NaN stays NaN.
pub fn normal_quantile(p: f64) -> f64 {
    #[allow(clippy::excessive_precision)]
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    #[allow(clippy::excessive_precision)]
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    #[allow(clippy::excessive_precision)]
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    #[allow(clippy::excessive_precision)]
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Critical value for a two-sided interval at `confidence`.
fn two_sided_z(confidence: f64) -> f64 {
    normal_quantile(0.5 + confidence / 2.0)
}

fn check_open_unit(name: &'static str, value: f64) -> Result<(), StatisticsError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(StatisticsError::OutsideOpenUnitInterval { name, value })
    }
}

fn check_counts(successes: u64, n: u64) -> Result<(), StatisticsError> {
    if n == 0 {
        return Err(StatisticsError::ZeroSamples);
    }
    if successes > n {
        return Err(StatisticsError::SuccessesExceedSamples { successes, n });
    }
    Ok(())
}

// ─── Proportion estimate ─────────────────────────────────────────────

/// How a two-sided confidence interval is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalMethod {
    /// p̂ ± z·SE, clamped to [0, 1]. Collapses to a point at p̂ ∈ {0, 1}.
    #[default]
    Normal,
    /// Wilson score interval. Stays informative at the boundaries.
    Wilson,
}

/// Point estimate and confidence interval for a success proportion.
///
/// Invariants: `0 <= point <= 1`, `n > 0`, `0 <= lower <= upper <= 1`,
/// `0 < confidence < 1`. Only constructible through [`proportion_estimate`]
/// and [`proportion_estimate_with`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProportionEstimate {
    point: f64,
    n: u64,
    standard_error: f64,
    lower: f64,
    upper: f64,
    confidence: f64,
    method: IntervalMethod,
}

impl ProportionEstimate {
    pub fn point(&self) -> f64 {
        self.point
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn standard_error(&self) -> f64 {
        self.standard_error
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn method(&self) -> IntervalMethod {
        self.method
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Proportion estimate with a normal-approximation interval.
pub fn proportion_estimate(
    successes: u64,
    n: u64,
    confidence: f64,
) -> Result<ProportionEstimate, StatisticsError> {
    proportion_estimate_with(IntervalMethod::Normal, successes, n, confidence)
}

/// Proportion estimate with the chosen interval method.
pub fn proportion_estimate_with(
    method: IntervalMethod,
    successes: u64,
    n: u64,
    confidence: f64,
) -> Result<ProportionEstimate, StatisticsError> {
    check_counts(successes, n)?;
    check_open_unit("confidence", confidence)?;

    let n_f = n as f64;
    let point = successes as f64 / n_f;
    let standard_error = (point * (1.0 - point) / n_f).sqrt();
    let z = two_sided_z(confidence);

    let (lower, upper) = match method {
        IntervalMethod::Normal => (point - z * standard_error, point + z * standard_error),
        IntervalMethod::Wilson => {
            let z2 = z * z;
            let denom = 1.0 + z2 / n_f;
            let centre = (point + z2 / (2.0 * n_f)) / denom;
            let half = z * (point * (1.0 - point) / n_f + z2 / (4.0 * n_f * n_f)).sqrt() / denom;
            (centre - half, centre + half)
        }
    };

    Ok(ProportionEstimate {
        point,
        n,
        standard_error,
        lower: lower.clamp(0.0, point),
        upper: upper.clamp(point, 1.0),
        confidence,
        method,
    })
}

/// One-sided Wilson score lower bound at `confidence`.
///
/// With 95% confidence the true rate is at least this value. Used to turn a
/// baseline measurement into a statistically justified minimum pass rate.
pub fn wilson_lower_bound(
    successes: u64,
    n: u64,
    confidence: f64,
) -> Result<f64, StatisticsError> {
    check_counts(successes, n)?;
    check_open_unit("confidence", confidence)?;

    let n_f = n as f64;
    let p = successes as f64 / n_f;
    let z = normal_quantile(confidence);
    let z2 = z * z;
    let denom = 1.0 + z2 / n_f;
    let centre = (p + z2 / (2.0 * n_f)) / denom;
    let half = z * (p * (1.0 - p) / n_f + z2 / (4.0 * n_f * n_f)).sqrt() / denom;

    Ok((centre - half).clamp(0.0, p))
}

// ─── Thresholds ──────────────────────────────────────────────────────

/// Minimum number of successes out of `n` that meets `min_pass_rate`.
///
/// Always rounds up: reaching the threshold means reaching this count. A NaN
/// rate is unreachable and yields `n + 1`, so it can never pass early.
///
/// `n * min_pass_rate` is reduced by an absolute 1e-9 before the ceiling so
/// float noise does not demand an extra success. As a consequence a rate
/// within `1e-9 / n` above `k / n` still requires only `k` successes:
/// `required_successes(10, 0.8000000001)` is 8, so 8/10 passes a threshold
/// it is nominally below. Early termination and the verdict share this
/// function, so they always agree.
pub fn required_successes(n: u64, min_pass_rate: f64) -> u64 {
    if min_pass_rate.is_nan() {
        return n.saturating_add(1);
    }
    let raw = n as f64 * min_pass_rate;
    if raw <= 0.0 {
        return 0;
    }
    let rounded = (raw - ROUNDING_TOLERANCE).ceil();
    if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        rounded as u64
    }
}

// ─── One-sided test ──────────────────────────────────────────────────

/// Result of a one-sided z-test of an observed proportion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneSidedTestResult {
    /// (p̂ - p0) / sqrt(p0 (1 - p0) / n)
    pub z_statistic: f64,
    /// Lower-tail p-value: P(Z <= z) under H0.
    pub p_value: f64,
}

/// One-sided test. H0: true rate >= `null_rate`; H1: true rate < `null_rate`.
///
/// A small p-value is evidence that the system falls short of the threshold.
/// At a degenerate null (0 or 1) the null variance is zero; the statistic is
/// then ±inf when the observation contradicts it, and 0 otherwise.
pub fn one_sided_test(
    successes: u64,
    n: u64,
    null_rate: f64,
) -> Result<OneSidedTestResult, StatisticsError> {
    check_counts(successes, n)?;
    if !(0.0..=1.0).contains(&null_rate) {
        return Err(StatisticsError::OutsideUnitInterval {
            name: "null rate",
            value: null_rate,
        });
    }

    let n_f = n as f64;
    let observed = successes as f64 / n_f;
    let null_se = (null_rate * (1.0 - null_rate) / n_f).sqrt();

    if null_se == 0.0 {
        let z_statistic = if observed < null_rate {
            f64::NEG_INFINITY
        } else if observed > null_rate {
            f64::INFINITY
        } else {
            0.0
        };
        let p_value = if observed < null_rate { 0.0 } else { 1.0 };
        return Ok(OneSidedTestResult {
            z_statistic,
            p_value,
        });
    }

    let z_statistic = (observed - null_rate) / null_se;
    Ok(OneSidedTestResult {
        z_statistic,
        p_value: normal_cdf(z_statistic),
    })
}

// ─── Sample size ─────────────────────────────────────────────────────

/// Samples needed to detect a drop from `null_rate` to `alt_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeRequirement {
    pub required_samples: u64,
    pub confidence: f64,
    pub power: f64,
    pub min_detectable_effect: f64,
    pub null_rate: f64,
    pub alt_rate: f64,
}

/// Classic one-sided power calculation for a single proportion.
///
/// n = ⌈((z_{conf}·√(p0 q0) + z_{power}·√(p1 q1)) / (p0 − p1))²⌉, at least 1.
pub fn sample_size_requirement(
    confidence: f64,
    power: f64,
    min_detectable_effect: f64,
    null_rate: f64,
    alt_rate: f64,
) -> Result<SampleSizeRequirement, StatisticsError> {
    check_open_unit("confidence", confidence)?;
    check_open_unit("power", power)?;
    check_open_unit("minimum detectable effect", min_detectable_effect)?;
    check_open_unit("null rate", null_rate)?;
    check_open_unit("alternative rate", alt_rate)?;
    if alt_rate >= null_rate {
        return Err(StatisticsError::NonPositiveEffect {
            null_rate,
            alt_rate,
        });
    }

    let z_alpha = normal_quantile(confidence);
    let z_beta = normal_quantile(power);
    let spread = z_alpha * (null_rate * (1.0 - null_rate)).sqrt()
        + z_beta * (alt_rate * (1.0 - alt_rate)).sqrt();
    let n = (spread / (null_rate - alt_rate)).powi(2).ceil();

    Ok(SampleSizeRequirement {
        required_samples: (n as u64).max(1),
        confidence,
        power,
        min_detectable_effect,
        null_rate,
        alt_rate,
    })
}
