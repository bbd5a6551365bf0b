//! The caller-supplied sample executor.

use std::sync::atomic::{AtomicBool, Ordering};

use trialgate_core::outcome::{SampleError, SampleResult};

/// What an executor sees about the sample it is running.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'a> {
    index: u64,
    cancel: &'a AtomicBool,
}

impl<'a> SampleContext<'a> {
    pub fn new(index: u64, cancel: &'a AtomicBool) -> Self {
        Self { index, cancel }
    }

    /// 0-based issue index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// True once the run is aborting. Long-running executors may poll this
    /// and return early; whatever they return is discarded.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// One trial of the procedure under test.
///
/// `Ok` carries the sample's own pass/fail judgement; `Err` means the
/// procedure raised, and is handled by the configured exception policy.
/// Implemented for any `Fn(SampleContext<'_>) -> Result<SampleResult, SampleError> + Sync`.
pub trait SampleExecutor: Sync {
    fn execute(&self, ctx: SampleContext<'_>) -> Result<SampleResult, SampleError>;
}

impl<F> SampleExecutor for F
where
    F: Fn(SampleContext<'_>) -> Result<SampleResult, SampleError> + Sync,
{
    fn execute(&self, ctx: SampleContext<'_>) -> Result<SampleResult, SampleError> {
        self(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_executors() {
        let cancel = AtomicBool::new(false);
        let executor = |ctx: SampleContext<'_>| -> Result<SampleResult, SampleError> {
            Ok(SampleResult::from_bool(ctx.index() % 2 == 0))
        };
        assert!(executor
            .execute(SampleContext::new(0, &cancel))
            .unwrap()
            .passed());
        assert!(!executor
            .execute(SampleContext::new(1, &cancel))
            .unwrap()
            .passed());
    }

    #[test]
    fn context_reports_cancellation() {
        let cancel = AtomicBool::new(false);
        let ctx = SampleContext::new(3, &cancel);
        assert!(!ctx.is_cancelled());
        cancel.store(true, Ordering::Release);
        assert!(ctx.is_cancelled());
    }
}
