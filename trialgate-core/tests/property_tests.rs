//! Property tests for inference and decision invariants.
//!
//! Uses proptest to verify:
//! 1. Required successes: exact ceiling rounding, monotonic in the rate
//! 2. Early termination is sound: rules fire only when the outcome is decided
//! 3. Early termination is lossless: same verdict as running every sample
//! 4. Pacing: effective delay dominates every constraint, throughput never
//!    exceeds a cap
//! 5. Budget: exhaustion is monotonic, charges sum exactly
//! 6. Proportion estimates: bounds ordered and inside [0, 1]

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use trialgate_core::aggregator::SampleResultAggregator;
use trialgate_core::budget::{BudgetLimits, BudgetScope, BudgetTracker};
use trialgate_core::config::TrialConfig;
use trialgate_core::early_termination::{EarlyTerminationEvaluator, TerminationReason};
use trialgate_core::outcome::SampleOutcome;
use trialgate_core::pacing::{PacingConstraints, PacingPlan};
use trialgate_core::statistics::{proportion_estimate_with, required_successes, IntervalMethod};
use trialgate_core::verdict::{RunUsage, VerdictDecider};

// ── Strategies (proptest) ────────────────────────────────────────────

/// Rates on a 1/1000 grid so the exact ceiling is computable in integers.
fn arb_permille() -> impl Strategy<Value = u64> {
    0..=1_000_u64
}

fn arb_outcomes() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..80)
}

fn arb_method() -> impl Strategy<Value = IntervalMethod> {
    prop_oneof![Just(IntervalMethod::Normal), Just(IntervalMethod::Wilson)]
}

/// Replays `outcomes` through evaluator + decider and returns
/// (passed, samples consumed).
fn replay(outcomes: &[bool], min_pass_rate: f64, early: bool) -> (bool, u64) {
    let config = TrialConfig {
        samples: outcomes.len() as u64,
        min_pass_rate,
        early_termination: early,
        ..TrialConfig::default()
    };
    let evaluator = EarlyTerminationEvaluator::new(config.samples, config.min_pass_rate);
    let mut agg = SampleResultAggregator::new(0);
    let mut reason = TerminationReason::Completed;

    for (i, &passed) in outcomes.iter().enumerate() {
        let outcome = if passed {
            SampleOutcome::Success
        } else {
            SampleOutcome::Failure {
                reason: "no".into(),
            }
        };
        agg.record(i as u64, &outcome, &[]);
        if early {
            if let Some(r) = evaluator.evaluate(agg.successes(), agg.samples_executed()) {
                reason = r;
                break;
            }
        }
    }

    let usage = RunUsage {
        elapsed_ms: 0,
        tokens_used: 0,
        pacing: PacingPlan::unpaced(1),
        budget: None,
    };
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let verdict = VerdictDecider::new(&config)
        .decide(&agg, reason, usage, now)
        .unwrap();
    (verdict.passed, verdict.samples_executed)
}

// ── 1. Required Successes ────────────────────────────────────────────

proptest! {
    #[test]
    fn required_successes_is_exact_ceiling(n in 1..10_000_u64, permille in arb_permille()) {
        let rate = permille as f64 / 1_000.0;
        let expected = (n * permille).div_ceil(1_000);
        prop_assert_eq!(required_successes(n, rate), expected);
    }

    #[test]
    fn required_successes_monotonic_in_rate(
        n in 1..10_000_u64,
        a in arb_permille(),
        b in arb_permille(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            required_successes(n, lo as f64 / 1_000.0) <= required_successes(n, hi as f64 / 1_000.0)
        );
    }
}

// ── 2. Early Termination Soundness ───────────────────────────────────

proptest! {
    #[test]
    fn rules_fire_only_when_decided(
        total in 1..500_u64,
        permille in arb_permille(),
        executed_frac in 0.0..=1.0_f64,
        success_frac in 0.0..=1.0_f64,
    ) {
        let eval = EarlyTerminationEvaluator::new(total, permille as f64 / 1_000.0);
        let executed = ((total as f64) * executed_frac).floor() as u64;
        let successes = ((executed as f64) * success_frac).floor() as u64;
        let remaining = total - executed;

        match eval.evaluate(successes, executed) {
            Some(TerminationReason::Impossibility) => {
                prop_assert!(successes + remaining < eval.required_successes());
            }
            Some(TerminationReason::SuccessGuaranteed) => {
                prop_assert!(successes >= eval.required_successes());
                prop_assert!(executed < total);
            }
            Some(other) => prop_assert!(false, "unexpected reason {:?}", other),
            None => {
                prop_assert!(successes + remaining >= eval.required_successes());
            }
        }
    }
}

// ── 3. Losslessness ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn early_termination_never_changes_verdict(
        outcomes in arb_outcomes(),
        permille in arb_permille(),
    ) {
        let rate = permille as f64 / 1_000.0;
        let (full, full_count) = replay(&outcomes, rate, false);
        let (early, early_count) = replay(&outcomes, rate, true);
        prop_assert_eq!(full, early);
        prop_assert_eq!(full_count, outcomes.len() as u64);
        prop_assert!(early_count <= full_count);
    }
}

// ── 4. Pacing ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn pacing_respects_every_constraint(
        rps in 0..50_u32,
        rpm in 0..3_000_u32,
        rph in 0..100_000_u32,
        min_delay in 0..2_000_u64,
        latency in 0..5_000_u64,
        concurrency in 1..64_usize,
        samples in 1..10_000_u64,
    ) {
        let constraints = PacingConstraints {
            max_per_second: rps,
            max_per_minute: rpm,
            max_per_hour: rph,
            min_delay_ms: min_delay,
            estimated_latency_ms: latency,
        };
        let plan = PacingPlan::compute(&constraints, samples, concurrency);

        prop_assert!(plan.effective_delay_ms >= min_delay);
        for implied in constraints.implied_delays_ms() {
            prop_assert!(plan.effective_delay_ms >= implied);
        }
        prop_assert!(plan.effective_concurrency >= 1);
        prop_assert!(plan.effective_concurrency <= concurrency);

        if let (Some(effective), Some(cap)) = (plan.effective_rps, constraints.tightest_rate_per_second()) {
            prop_assert!(effective <= cap + 1e-9);
        }
        if rps > 0 {
            prop_assert!(plan.effective_rps.unwrap_or(f64::INFINITY) <= f64::from(rps) + 1e-9);
        }
    }
}

// ── 5. Budget ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn budget_exhaustion_is_monotonic(
        limit in 1..1_000_u64,
        charges in prop::collection::vec((0..100_u64, 0..100_u64), 1..40),
    ) {
        let tracker = BudgetTracker::new(BudgetScope::Method, BudgetLimits::new(limit, limit));
        let mut seen_exhausted = false;
        let mut time_sum = 0;
        let mut token_sum = 0;
        for (time_ms, tokens) in charges {
            let snapshot = tracker.charge(time_ms, tokens);
            time_sum += time_ms;
            token_sum += tokens;
            if seen_exhausted {
                prop_assert!(snapshot.exhausted);
            }
            seen_exhausted |= snapshot.exhausted;
            prop_assert_eq!(snapshot.time_used_ms, time_sum);
            prop_assert_eq!(snapshot.tokens_used, token_sum);
        }
        prop_assert_eq!(tracker.is_exhausted(), seen_exhausted);
    }
}

// ── 6. Proportion Estimates ──────────────────────────────────────────

proptest! {
    #[test]
    fn interval_bounds_are_ordered(
        n in 1..5_000_u64,
        success_frac in 0.0..=1.0_f64,
        confidence in 0.5..0.999_f64,
        method in arb_method(),
    ) {
        let successes = ((n as f64) * success_frac).floor() as u64;
        let est = proportion_estimate_with(method, successes, n, confidence).unwrap();
        prop_assert!((0.0..=1.0).contains(&est.point()));
        prop_assert!(0.0 <= est.lower());
        prop_assert!(est.lower() <= est.point());
        prop_assert!(est.point() <= est.upper());
        prop_assert!(est.upper() <= 1.0);
        prop_assert!(est.standard_error() >= 0.0);
    }
}
