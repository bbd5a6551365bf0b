//! Sequential test runner: drives samples to a verdict.
//!
//! Per sample:
//! 1. Stop scheduling if the budget is exhausted (or a static token charge
//!    no longer fits).
//! 2. Wait for a dispatch slot from the pacing gate.
//! 3. Invoke the executor; classify errors and panics per exception policy.
//! 4. Record the outcome and charge the budget with elapsed time and tokens.
//! 5. Ask the early-termination evaluator whether to stop dispatching.
//!
//! With concurrency > 1 the same loop runs on every worker of a bounded
//! Rayon pool. All run state sits behind one mutex, so recording, budget
//! charging, and the stop decision for one completion happen atomically with
//! respect to every other completion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use trialgate_core::aggregator::SampleResultAggregator;
use trialgate_core::budget::{BudgetLimits, BudgetScope, BudgetSnapshot, BudgetTracker};
use trialgate_core::config::{ConfigError, ExceptionPolicy, TokenCharge, TrialConfig};
use trialgate_core::early_termination::{EarlyTerminationEvaluator, TerminationReason};
use trialgate_core::outcome::{SampleError, SampleResult};
use trialgate_core::pacing::{PacingPlan, PacingWarning};
use trialgate_core::statistics::StatisticsError;
use trialgate_core::verdict::{RunUsage, Verdict, VerdictDecider};

use crate::executor::{SampleContext, SampleExecutor};
use crate::pacer::DispatchGate;
use crate::progress::{RunPhase, TrialProgress};

/// Errors that cross the runner boundary instead of becoming a verdict.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("statistics error: {0}")]
    Statistics(#[from] StatisticsError),
    #[error("sample {index} aborted the run: {source}")]
    SampleAborted {
        index: u64,
        #[source]
        source: SampleError,
    },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

type ProgressHook<'a> = &'a (dyn Fn(&TrialProgress) + Sync);

/// Configurable entry point. For the common case use [`run`].
pub struct TrialRunner<'a> {
    config: &'a TrialConfig,
    budget_parent: Option<Arc<BudgetTracker>>,
    progress: Option<ProgressHook<'a>>,
}

impl<'a> TrialRunner<'a> {
    pub fn new(config: &'a TrialConfig) -> Self {
        Self {
            config,
            budget_parent: None,
            progress: None,
        }
    }

    /// Charge an enclosing (class or suite) budget as well as this run's own.
    pub fn with_budget_parent(mut self, parent: Arc<BudgetTracker>) -> Self {
        self.budget_parent = Some(parent);
        self
    }

    /// Called after each sample is recorded or discarded, under the state lock,
    /// and once more with phase `VerdictReady` when the verdict is decided.
    pub fn with_progress(mut self, hook: ProgressHook<'a>) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Pre-flight pacing plan for this config.
    pub fn plan(&self) -> PacingPlan {
        PacingPlan::compute(
            &self.config.pacing,
            self.config.samples,
            self.config.max_concurrency,
        )
    }

    /// Execute samples until done and return the verdict.
    ///
    /// Returns `Err` only for invalid configuration, invalid inference inputs,
    /// or an executor error under [`ExceptionPolicy::Propagate`].
    pub fn run<E: SampleExecutor + ?Sized>(&self, executor: &E) -> Result<Verdict, RunError> {
        let config = self.config;
        config.validate()?;

        let plan = self.plan();
        for warning in &plan.warnings {
            match warning {
                PacingWarning::ConcurrencyUnbounded { requested } => warn!(
                    requested,
                    "rate caps set without estimated latency; concurrency not clamped"
                ),
            }
        }

        let mut budget = BudgetTracker::new(
            BudgetScope::Method,
            BudgetLimits::new(config.time_budget_ms, config.token_budget),
        );
        if let Some(parent) = &self.budget_parent {
            budget = budget.with_parent(Arc::clone(parent));
        }

        info!(
            samples = config.samples,
            min_pass_rate = config.min_pass_rate,
            concurrency = plan.effective_concurrency,
            delay_ms = plan.effective_delay_ms,
            estimated_duration_ms = plan.estimated_duration_ms,
            fingerprint = %config.fingerprint(),
            "starting trial"
        );

        let shared = Shared::new(config, &plan, budget, self.progress);
        shared.start();

        if plan.effective_concurrency > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(plan.effective_concurrency)
                .thread_name(|i| format!("trialgate-worker-{i}"))
                .build()?;
            pool.install(|| {
                (0..plan.effective_concurrency)
                    .into_par_iter()
                    .for_each(|_| shared.worker_loop(executor));
            });
        } else {
            shared.worker_loop(executor);
        }

        let mut state = shared.into_state();
        if let Some((index, source)) = state.abort.take() {
            warn!(index, error = %source, "run aborted by sample error");
            return Err(RunError::SampleAborted { index, source });
        }

        // no-op unless the workers drained without recording a stop reason
        state.stop(TerminationReason::Completed);
        let reason = state.reason.unwrap_or(TerminationReason::Completed);
        let usage = RunUsage {
            elapsed_ms: state.started.elapsed().as_millis() as u64,
            tokens_used: state.tokens_used,
            pacing: plan,
            budget: state.budget_snapshot,
        };
        let verdict = VerdictDecider::new(config).decide(
            &state.aggregator,
            reason,
            usage,
            chrono::Utc::now(),
        )?;

        state.advance(RunPhase::VerdictReady);
        debug!(phase = %state.phase, "verdict ready");
        if let Some(hook) = self.progress {
            hook(&state.progress(config.samples));
        }
        Ok(verdict)
    }
}

/// Run `executor` under `config` with no enclosing budget or progress hook.
pub fn run<E: SampleExecutor + ?Sized>(
    config: &TrialConfig,
    executor: &E,
) -> Result<Verdict, RunError> {
    TrialRunner::new(config).run(executor)
}

// ─── Run state ───────────────────────────────────────────────────────

struct RunState {
    phase: RunPhase,
    aggregator: SampleResultAggregator,
    /// Set once; stops dispatch. Single source of truth for "terminated".
    reason: Option<TerminationReason>,
    abort: Option<(u64, SampleError)>,
    next_index: u64,
    in_flight: usize,
    tokens_used: u64,
    started: Instant,
    last_charge: Instant,
    budget_snapshot: Option<BudgetSnapshot>,
}

impl RunState {
    /// No further dispatch: terminated or aborting.
    fn halted(&self) -> bool {
        self.reason.is_some() || self.abort.is_some()
    }

    fn stop(&mut self, reason: TerminationReason) {
        if self.reason.is_none() {
            self.reason = Some(reason);
            self.advance(RunPhase::stopped_by(reason));
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {} -> {}",
            self.phase,
            next
        );
        self.phase = next;
    }

    fn progress(&self, samples_planned: u64) -> TrialProgress {
        TrialProgress {
            phase: self.phase,
            samples_planned,
            samples_executed: self.aggregator.samples_executed(),
            successes: self.aggregator.successes(),
            failures: self.aggregator.failures(),
            ignored: self.aggregator.ignored(),
            in_flight: self.in_flight,
            tokens_used: self.tokens_used,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            termination_reason: self.reason.unwrap_or_default(),
        }
    }
}

struct Shared<'a> {
    config: &'a TrialConfig,
    evaluator: EarlyTerminationEvaluator,
    budget: BudgetTracker,
    gate: DispatchGate,
    cancel: AtomicBool,
    ignore_cap: u64,
    progress: Option<ProgressHook<'a>>,
    state: Mutex<RunState>,
}

/// What the executor produced for one dispatched sample.
enum Completion {
    Returned(SampleResult),
    Raised(SampleError),
}

impl<'a> Shared<'a> {
    fn new(
        config: &'a TrialConfig,
        plan: &PacingPlan,
        budget: BudgetTracker,
        progress: Option<ProgressHook<'a>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            evaluator: EarlyTerminationEvaluator::new(config.samples, config.min_pass_rate),
            budget,
            gate: DispatchGate::from_plan(plan),
            cancel: AtomicBool::new(false),
            ignore_cap: config.ignored_retry_cap(),
            progress,
            state: Mutex::new(RunState {
                phase: RunPhase::NotStarted,
                aggregator: SampleResultAggregator::new(config.max_example_failures),
                reason: None,
                abort: None,
                next_index: 0,
                in_flight: 0,
                tokens_used: 0,
                started: now,
                last_charge: now,
                budget_snapshot: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self) {
        let mut state = self.lock();
        state.phase = RunPhase::Running;
        let now = Instant::now();
        state.started = now;
        state.last_charge = now;
    }

    fn into_state(self) -> RunState {
        let budget_tracked = !self.budget.limits().is_unlimited() || self.budget.parent().is_some();
        let mut state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        if budget_tracked {
            state.budget_snapshot = Some(self.budget.snapshot());
        }
        state
    }

    fn is_halted(&self) -> bool {
        self.lock().halted()
    }

    fn worker_loop<E: SampleExecutor + ?Sized>(&self, executor: &E) {
        loop {
            if self.is_halted() {
                return;
            }
            self.gate.wait();
            let Some(index) = self.claim() else {
                return;
            };

            let ctx = SampleContext::new(index, &self.cancel);
            let completion = match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(ctx))) {
                Ok(Ok(result)) => Completion::Returned(result),
                Ok(Err(error)) => Completion::Raised(error),
                Err(payload) => Completion::Raised(SampleError::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            };
            self.complete(index, completion);
        }
    }

    /// Reserve the next issue index, or `None` if nothing more may be
    /// dispatched.
    fn claim(&self) -> Option<u64> {
        let mut state = self.lock();
        if state.halted() {
            return None;
        }
        if self.budget.is_exhausted() {
            state.stop(TerminationReason::BudgetExhausted);
            return None;
        }
        if let Some(per_sample) = self.config.static_token_charge() {
            // a dispatched-but-uncharged sample will also be charged
            let pending = per_sample.saturating_mul(state.in_flight as u64 + 1);
            if !self.budget.can_afford(pending) {
                state.stop(TerminationReason::BudgetExhausted);
                return None;
            }
        }
        let counted_or_pending = state.aggregator.samples_executed() + state.in_flight as u64;
        if counted_or_pending >= self.config.samples {
            return None;
        }
        let index = state.next_index;
        state.next_index += 1;
        state.in_flight += 1;
        Some(index)
    }

    fn complete(&self, index: u64, completion: Completion) {
        let mut state = self.lock();
        state.in_flight -= 1;

        if state.abort.is_some() {
            // aborting: in-flight results are discarded
            return;
        }

        let tokens = match (&completion, self.config.token_charge) {
            (_, TokenCharge::Static { per_sample }) => per_sample,
            (Completion::Returned(result), TokenCharge::Dynamic) => {
                result.tokens_used().unwrap_or(0)
            }
            (Completion::Raised(_), TokenCharge::Dynamic) => 0,
        };
        let now = Instant::now();
        let time_ms = now.duration_since(state.last_charge).as_millis() as u64;
        state.last_charge = now;
        state.tokens_used = state.tokens_used.saturating_add(tokens);
        let snapshot = self.budget.charge(time_ms, tokens);

        match completion {
            Completion::Returned(result) => {
                let outcome = result.to_outcome();
                debug!(index, outcome = ?outcome, "sample recorded");
                state.aggregator.record(index, &outcome, result.criteria());
            }
            Completion::Raised(error) => match self.config.on_exception {
                ExceptionPolicy::FailSample => {
                    let outcome = error.to_outcome();
                    debug!(index, outcome = ?outcome, "sample errored");
                    state.aggregator.record(index, &outcome, &[]);
                }
                ExceptionPolicy::Propagate => {
                    self.cancel.store(true, Ordering::Release);
                    state.abort = Some((index, error));
                    return;
                }
                ExceptionPolicy::Ignore => {
                    state.aggregator.record_ignored();
                    warn!(index, error = %error, "sample error ignored");
                    if state.aggregator.ignored() > self.ignore_cap {
                        warn!(cap = self.ignore_cap, "ignored retry cap reached");
                        state.stop(TerminationReason::Completed);
                    }
                }
            },
        }

        let executed = state.aggregator.samples_executed();
        let successes = state.aggregator.successes();
        if state.reason.is_none() && self.config.early_termination {
            if let Some(reason) = self.evaluator.evaluate(successes, executed) {
                debug!(
                    reason = %reason,
                    detail = %self.evaluator.describe(reason, successes, executed),
                    "early termination"
                );
                state.stop(reason);
            }
        }
        // every planned sample counted: nothing is left for a budget to stop
        if state.reason.is_none() && executed >= self.config.samples {
            state.stop(TerminationReason::Completed);
        }
        if state.reason.is_none() && snapshot.exhausted {
            state.stop(TerminationReason::BudgetExhausted);
        }

        if let Some(hook) = self.progress {
            hook(&state.progress(self.config.samples));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
