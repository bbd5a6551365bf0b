//! TrialGate Runner — executes samples and produces verdicts.
//!
//! This crate builds on `trialgate-core` to provide:
//! - The sample loop (`run(config, executor) -> Verdict`)
//! - Runtime pacing through a shared dispatch gate
//! - A bounded Rayon worker pool for concurrent samples
//! - Exception policies, panic capture, and cooperative cancellation
//! - Progress snapshots for reporting layers

pub mod executor;
pub mod pacer;
pub mod progress;
pub mod runner;

pub use executor::{SampleContext, SampleExecutor};
pub use pacer::DispatchGate;
pub use progress::{RunPhase, TrialProgress};
pub use runner::{run, RunError, TrialRunner};
