//! Pacing planner: turns rate-limit constraints into an executable plan.
//!
//! The plan is computed once before the sample loop starts and is never
//! recomputed mid-run. Durations and throughput are estimates for pre-flight
//! reporting; the runner's dispatch gate is what actually enforces spacing.
//!
//! The most restrictive constraint always wins: the effective delay is the
//! maximum of every cap's implied delay and the explicit delay, never an
//! average.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate-limit constraints. Zero means "no constraint" for every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConstraints {
    pub max_per_second: u32,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    /// Explicit minimum delay between dispatches, in milliseconds.
    pub min_delay_ms: u64,
    /// Expected latency of one sample, in milliseconds. Zero when unknown.
    pub estimated_latency_ms: u64,
}

impl PacingConstraints {
    pub fn has_rate_caps(&self) -> bool {
        self.max_per_second > 0 || self.max_per_minute > 0 || self.max_per_hour > 0
    }

    pub fn is_unconstrained(&self) -> bool {
        !self.has_rate_caps() && self.min_delay_ms == 0
    }

    /// Delays implied by each configured cap, in milliseconds (rounded up).
    pub fn implied_delays_ms(&self) -> Vec<u64> {
        let mut delays = Vec::with_capacity(3);
        if self.max_per_second > 0 {
            delays.push(ceil_div(1_000, u64::from(self.max_per_second)));
        }
        if self.max_per_minute > 0 {
            delays.push(ceil_div(60_000, u64::from(self.max_per_minute)));
        }
        if self.max_per_hour > 0 {
            delays.push(ceil_div(3_600_000, u64::from(self.max_per_hour)));
        }
        delays
    }

    /// Tightest cap expressed in requests per second.
    pub fn tightest_rate_per_second(&self) -> Option<f64> {
        let mut caps = Vec::with_capacity(3);
        if self.max_per_second > 0 {
            caps.push(f64::from(self.max_per_second));
        }
        if self.max_per_minute > 0 {
            caps.push(f64::from(self.max_per_minute) / 60.0);
        }
        if self.max_per_hour > 0 {
            caps.push(f64::from(self.max_per_hour) / 3_600.0);
        }
        caps.into_iter().reduce(f64::min)
    }
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    numerator.div_ceil(denominator)
}

/// Something the planner could not guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacingWarning {
    /// Rate caps are set but per-sample latency is unknown, so the requested
    /// concurrency passed through unclamped.
    ConcurrencyUnbounded { requested: usize },
}

/// Derived pacing plan. Read-only once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingPlan {
    pub effective_delay_ms: u64,
    pub effective_concurrency: usize,
    /// Aggregate requests per second; `None` when unbounded.
    pub effective_rps: Option<f64>,
    /// Estimated wall time for all samples; zero when unknown.
    pub estimated_duration_ms: u64,
    pub warnings: Vec<PacingWarning>,
}

impl PacingPlan {
    /// Compute the plan for `samples` samples at `requested_concurrency`.
    pub fn compute(
        constraints: &PacingConstraints,
        samples: u64,
        requested_concurrency: usize,
    ) -> Self {
        let requested = requested_concurrency.max(1);
        let effective_delay_ms = constraints
            .implied_delays_ms()
            .into_iter()
            .fold(constraints.min_delay_ms, u64::max);

        let tightest = constraints.tightest_rate_per_second();
        let latency_ms = constraints.estimated_latency_ms;
        let mut warnings = Vec::new();

        let effective_concurrency = match tightest {
            Some(cap) if latency_ms > 0 => {
                let sustainable = (cap * latency_ms as f64 / 1_000.0).floor() as usize;
                requested.min(sustainable.max(1))
            }
            Some(_) => {
                if requested > 1 {
                    warnings.push(PacingWarning::ConcurrencyUnbounded { requested });
                }
                requested
            }
            None => requested,
        };

        let effective_rps = if effective_delay_ms == 0 {
            tightest
        } else {
            let raw = effective_concurrency as f64 * 1_000.0 / effective_delay_ms as f64;
            Some(tightest.map_or(raw, |cap| raw.min(cap)))
        };

        let estimated_duration_ms = match effective_rps {
            Some(rps) if rps > 0.0 => (samples as f64 / rps * 1_000.0).ceil() as u64,
            _ if latency_ms > 0 => samples.saturating_mul(latency_ms),
            _ => 0,
        };

        Self {
            effective_delay_ms,
            effective_concurrency,
            effective_rps,
            estimated_duration_ms,
            warnings,
        }
    }

    /// Unpaced plan: no delay, the given concurrency, unknown duration.
    pub fn unpaced(concurrency: usize) -> Self {
        Self {
            effective_delay_ms: 0,
            effective_concurrency: concurrency.max(1),
            effective_rps: None,
            estimated_duration_ms: 0,
            warnings: Vec::new(),
        }
    }

    /// Minimum spacing between consecutive dispatches across all workers.
    pub fn dispatch_interval(&self) -> Duration {
        match self.effective_rps {
            Some(rps) if rps > 0.0 && rps.is_finite() => Duration::from_secs_f64(1.0 / rps),
            _ => Duration::ZERO,
        }
    }

    pub fn is_paced(&self) -> bool {
        !self.dispatch_interval().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(rps: u32, rpm: u32, rph: u32) -> PacingConstraints {
        PacingConstraints {
            max_per_second: rps,
            max_per_minute: rpm,
            max_per_hour: rph,
            ..Default::default()
        }
    }

    #[test]
    fn unconstrained_plan() {
        let plan = PacingPlan::compute(&PacingConstraints::default(), 100, 1);
        assert_eq!(plan.effective_delay_ms, 0);
        assert_eq!(plan.effective_concurrency, 1);
        assert_eq!(plan.effective_rps, None);
        assert_eq!(plan.estimated_duration_ms, 0);
        assert!(!plan.is_paced());
    }

    #[test]
    fn most_restrictive_cap_wins() {
        // 10/s -> 100ms, 60/min -> 1000ms, 7200/h -> 500ms
        let plan = PacingPlan::compute(&caps(10, 60, 7_200), 10, 1);
        assert_eq!(plan.effective_delay_ms, 1_000);
        assert_eq!(plan.effective_rps, Some(1.0));
        assert_eq!(plan.estimated_duration_ms, 10_000);
    }

    #[test]
    fn implied_delay_rounds_up() {
        let plan = PacingPlan::compute(&caps(3, 0, 0), 1, 1);
        assert_eq!(plan.effective_delay_ms, 334);
    }

    #[test]
    fn explicit_delay_beats_looser_cap() {
        let constraints = PacingConstraints {
            max_per_second: 100,
            min_delay_ms: 250,
            ..Default::default()
        };
        let plan = PacingPlan::compute(&constraints, 8, 1);
        assert_eq!(plan.effective_delay_ms, 250);
        assert_eq!(plan.effective_rps, Some(4.0));
        assert_eq!(plan.estimated_duration_ms, 2_000);
    }

    #[test]
    fn concurrency_clamped_when_latency_known() {
        let constraints = PacingConstraints {
            max_per_second: 5,
            estimated_latency_ms: 400,
            ..Default::default()
        };
        // 5/s * 0.4s = 2 in flight at most
        let plan = PacingPlan::compute(&constraints, 100, 8);
        assert_eq!(plan.effective_concurrency, 2);
        assert!(plan.warnings.is_empty());
        assert!(plan.effective_rps.unwrap() <= 5.0);
    }

    #[test]
    fn concurrency_clamp_has_floor_of_one() {
        let constraints = PacingConstraints {
            max_per_minute: 6,
            estimated_latency_ms: 50,
            ..Default::default()
        };
        let plan = PacingPlan::compute(&constraints, 10, 4);
        assert_eq!(plan.effective_concurrency, 1);
    }

    #[test]
    fn unknown_latency_passes_concurrency_through_with_warning() {
        let plan = PacingPlan::compute(&caps(5, 0, 0), 100, 8);
        assert_eq!(plan.effective_concurrency, 8);
        assert_eq!(
            plan.warnings,
            vec![PacingWarning::ConcurrencyUnbounded { requested: 8 }]
        );
        // Aggregate rate still clamped to the cap
        assert_eq!(plan.effective_rps, Some(5.0));
    }

    #[test]
    fn explicit_delay_scales_with_concurrency() {
        let constraints = PacingConstraints {
            min_delay_ms: 100,
            ..Default::default()
        };
        let plan = PacingPlan::compute(&constraints, 40, 4);
        assert_eq!(plan.effective_rps, Some(40.0));
        assert_eq!(plan.estimated_duration_ms, 1_000);
        assert_eq!(plan.dispatch_interval(), Duration::from_millis(25));
    }

    #[test]
    fn latency_fallback_for_duration() {
        let constraints = PacingConstraints {
            estimated_latency_ms: 30,
            ..Default::default()
        };
        let plan = PacingPlan::compute(&constraints, 10, 1);
        assert_eq!(plan.effective_rps, None);
        assert_eq!(plan.estimated_duration_ms, 300);
    }

    #[test]
    fn zero_concurrency_treated_as_one() {
        let plan = PacingPlan::compute(&PacingConstraints::default(), 10, 0);
        assert_eq!(plan.effective_concurrency, 1);
    }
}
