//! Concurrency torture tests for the bounded worker pool.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use trialgate_core::config::{ExceptionPolicy, TokenCharge, TrialConfig};
use trialgate_core::early_termination::TerminationReason;
use trialgate_core::outcome::{SampleError, SampleResult};
use trialgate_core::pacing::PacingConstraints;
use trialgate_runner::{run, RunError, SampleContext, TrialProgress, TrialRunner};

type Outcome = Result<SampleResult, SampleError>;

fn concurrent(samples: u64, min_pass_rate: f64, concurrency: usize) -> TrialConfig {
    TrialConfig {
        samples,
        min_pass_rate,
        max_concurrency: concurrency,
        ..TrialConfig::default()
    }
}

#[test]
fn hard_fail_concurrent_counts_match_sequential() {
    let executor = |ctx: SampleContext<'_>| -> Outcome {
        thread::sleep(Duration::from_millis(1));
        Ok(SampleResult::from_bool(ctx.index() % 10 != 0))
    };
    let serial = TrialConfig {
        early_termination: false,
        ..concurrent(200, 0.8, 1)
    };
    let parallel = TrialConfig {
        max_concurrency: 8,
        ..serial.clone()
    };

    let left = run(&serial, &executor).unwrap();
    let right = run(&parallel, &executor).unwrap();

    assert_eq!(left.samples_executed, 200);
    assert_eq!(right.samples_executed, 200);
    assert_eq!(left.successes, 180);
    assert_eq!(right.successes, 180);
    assert_eq!(left.passed, right.passed);
    assert_eq!(right.pacing.effective_concurrency, 8);
}

#[test]
fn hard_fail_in_flight_never_exceeds_concurrency() {
    let current = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let executor = |_ctx: SampleContext<'_>| -> Outcome {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        current.fetch_sub(1, Ordering::SeqCst);
        Ok(SampleResult::pass())
    };
    let cfg = TrialConfig {
        early_termination: false,
        ..concurrent(64, 0.5, 4)
    };

    let verdict = run(&cfg, &executor).unwrap();

    assert_eq!(verdict.samples_executed, 64);
    assert!(peak.load(Ordering::SeqCst) <= 4);
}

#[test]
fn hard_fail_early_termination_drains_in_flight() {
    let calls = AtomicU64::new(0);
    let executor = |_ctx: SampleContext<'_>| -> Outcome {
        calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        Ok(SampleResult::fail("nope"))
    };
    let cfg = concurrent(100, 0.95, 4);

    let verdict = run(&cfg, &executor).unwrap();

    // 6 failures decide the run; at most 3 more were already in flight
    assert_eq!(verdict.termination_reason, TerminationReason::Impossibility);
    assert!(!verdict.passed);
    assert!((6..=9).contains(&verdict.samples_executed));
    assert_eq!(calls.load(Ordering::SeqCst), verdict.samples_executed);
}

#[test]
fn hard_fail_propagate_cancels_in_flight() {
    let saw_cancel = AtomicBool::new(false);
    let executor = |ctx: SampleContext<'_>| -> Outcome {
        if ctx.index() == 5 {
            return Err(SampleError::raised("fatal"));
        }
        for _ in 0..50 {
            if ctx.is_cancelled() {
                saw_cancel.store(true, Ordering::SeqCst);
                return Ok(SampleResult::pass());
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(SampleResult::pass())
    };
    let cfg = TrialConfig {
        on_exception: ExceptionPolicy::Propagate,
        early_termination: false,
        ..concurrent(1_000, 0.5, 4)
    };

    match run(&cfg, &executor) {
        Err(RunError::SampleAborted { index, .. }) => assert_eq!(index, 5),
        other => panic!("expected SampleAborted, got {other:?}"),
    }
    assert!(saw_cancel.load(Ordering::SeqCst));
}

#[test]
fn hard_fail_no_sample_starts_after_token_exhaustion() {
    let calls = AtomicU64::new(0);
    let executor = |_ctx: SampleContext<'_>| -> Outcome {
        calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        Ok(SampleResult::pass())
    };
    let cfg = TrialConfig {
        token_budget: 100,
        token_charge: TokenCharge::Static { per_sample: 10 },
        ..concurrent(1_000, 0.5, 6)
    };

    let verdict = run(&cfg, &executor).unwrap();

    assert_eq!(verdict.termination_reason, TerminationReason::BudgetExhausted);
    assert!(verdict.tokens_used <= 100);
    assert_eq!(calls.load(Ordering::SeqCst) * 10, verdict.tokens_used);
}

#[test]
fn hard_fail_rate_cap_holds_across_workers() {
    let cfg = TrialConfig {
        early_termination: false,
        pacing: PacingConstraints {
            max_per_second: 50,
            ..Default::default()
        },
        ..concurrent(11, 0.5, 4)
    };
    let executor = |_ctx: SampleContext<'_>| -> Outcome { Ok(SampleResult::pass()) };

    let start = std::time::Instant::now();
    let verdict = run(&cfg, &executor).unwrap();

    // 11 dispatches at 20ms spacing take at least 200ms regardless of workers
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(verdict.samples_executed, 11);
    assert!(!verdict.pacing.warnings.is_empty());
}

#[test]
fn hard_fail_progress_is_monotonic_under_concurrency() {
    let last = AtomicU64::new(0);
    let regressions = AtomicU64::new(0);
    let hook = |p: &TrialProgress| {
        let prev = last.swap(p.samples_executed, Ordering::SeqCst);
        if p.samples_executed < prev {
            regressions.fetch_add(1, Ordering::SeqCst);
        }
    };
    let executor = |ctx: SampleContext<'_>| -> Outcome {
        thread::sleep(Duration::from_micros(200 * (ctx.index() % 5)));
        Ok(SampleResult::pass())
    };
    let cfg = TrialConfig {
        early_termination: false,
        ..concurrent(100, 0.5, 8)
    };

    TrialRunner::new(&cfg)
        .with_progress(&hook)
        .run(&executor)
        .unwrap();

    assert_eq!(regressions.load(Ordering::SeqCst), 0);
    assert_eq!(last.load(Ordering::SeqCst), 100);
}
