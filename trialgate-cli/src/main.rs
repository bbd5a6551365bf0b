//! TrialGate CLI — simulate trials and inspect the planning math.
//!
//! Commands:
//! - `simulate`: run a trial against a seeded Bernoulli simulator
//! - `plan`: show the pre-flight pacing plan for a configuration
//! - `sample-size`: samples needed to detect a drop in success rate
//! - `threshold`: derive a minimum pass rate from a baseline measurement

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use trialgate_core::outcome::{SampleError, SampleResult};
use trialgate_core::resolve::{resolve, ConfigLayers, PartialTrialConfig};
use trialgate_core::statistics::sample_size_requirement;
use trialgate_core::{Baseline, PacingPlan, TrialConfig};
use trialgate_runner::{SampleContext, TrialProgress, TrialRunner};

#[derive(Parser)]
#[command(
    name = "trialgate",
    about = "TrialGate CLI — statistically gated trials of non-deterministic procedures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a trial against a simulated procedure with a known success rate.
    Simulate {
        #[command(flatten)]
        layers: LayerArgs,

        /// True success probability of the simulated procedure.
        #[arg(long, default_value_t = 0.95)]
        true_rate: f64,

        /// Probability that a sample raises instead of reporting.
        #[arg(long, default_value_t = 0.0)]
        error_rate: f64,

        /// Simulated latency per sample, in milliseconds.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Seed for the simulator.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Print the verdict as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the pacing plan a configuration resolves to.
    Plan {
        #[command(flatten)]
        layers: LayerArgs,
    },
    /// Samples needed to detect a drop from a null rate.
    SampleSize {
        /// Rate the procedure is expected to meet.
        #[arg(long)]
        null_rate: f64,

        /// Smallest drop below the null rate worth detecting.
        #[arg(long, default_value_t = 0.05)]
        effect: f64,

        #[arg(long, default_value_t = 0.95)]
        confidence: f64,

        #[arg(long, default_value_t = 0.8)]
        power: f64,
    },
    /// Derive a minimum pass rate from a baseline measurement.
    Threshold {
        #[arg(long)]
        samples: u64,

        #[arg(long)]
        successes: u64,

        #[arg(long, default_value_t = 0.95)]
        confidence: f64,

        /// Date the baseline was measured (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        generated: Option<String>,
    },
}

/// Configuration sources, lowest precedence first.
#[derive(Args)]
struct LayerArgs {
    /// Declared defaults from a TOML file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Property overrides, e.g. `-D trialgate.minPassRate=0.9`.
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// Skip `TRIALGATE_*` environment variables.
    #[arg(long, default_value_t = false)]
    no_env: bool,

    #[arg(long)]
    samples: Option<u64>,

    #[arg(long)]
    min_pass_rate: Option<f64>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    time_budget_ms: Option<u64>,

    #[arg(long)]
    token_budget: Option<u64>,

    #[arg(long)]
    max_per_second: Option<u32>,

    #[arg(long)]
    max_per_minute: Option<u32>,

    /// Attach a statistical explanation to the verdict.
    #[arg(long, default_value_t = false)]
    explain: bool,
}

impl LayerArgs {
    fn resolve(&self) -> Result<TrialConfig> {
        let declared = match &self.config {
            Some(path) => PartialTrialConfig::from_file(path)?,
            None => PartialTrialConfig::default(),
        };

        let mut props = BTreeMap::new();
        for entry in &self.properties {
            let Some((key, value)) = entry.split_once('=') else {
                bail!("property '{entry}' is not KEY=VALUE");
            };
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
        let properties = PartialTrialConfig::from_properties(&props)?;

        let env = if self.no_env {
            PartialTrialConfig::default()
        } else {
            PartialTrialConfig::from_env()?
        };

        let explicit = PartialTrialConfig {
            samples: self.samples,
            min_pass_rate: self.min_pass_rate,
            max_concurrency: self.concurrency,
            time_budget_ms: self.time_budget_ms,
            token_budget: self.token_budget,
            max_per_second: self.max_per_second,
            max_per_minute: self.max_per_minute,
            explain: self.explain.then_some(true),
            ..Default::default()
        };

        let config = resolve(&ConfigLayers {
            declared,
            properties,
            env,
            explicit,
        })?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            layers,
            true_rate,
            error_rate,
            latency_ms,
            seed,
            json,
        } => run_simulate(&layers, true_rate, error_rate, latency_ms, seed, json),
        Commands::Plan { layers } => run_plan(&layers),
        Commands::SampleSize {
            null_rate,
            effect,
            confidence,
            power,
        } => run_sample_size(null_rate, effect, confidence, power),
        Commands::Threshold {
            samples,
            successes,
            confidence,
            generated,
        } => run_threshold(samples, successes, confidence, generated.as_deref()),
    }
}

fn run_simulate(
    layers: &LayerArgs,
    true_rate: f64,
    error_rate: f64,
    latency_ms: u64,
    seed: u64,
    json: bool,
) -> Result<()> {
    if !(0.0..=1.0).contains(&true_rate) || !(0.0..=1.0).contains(&error_rate) {
        bail!("--true-rate and --error-rate must lie in [0, 1]");
    }
    let config = layers.resolve()?;

    // one RNG per issue index keeps outcomes independent of worker scheduling
    let executor = |ctx: SampleContext<'_>| -> Result<SampleResult, SampleError> {
        let mut rng = StdRng::seed_from_u64(seed ^ ctx.index().wrapping_mul(0x9E37_79B9_7F4A_7C15));
        if latency_ms > 0 {
            thread::sleep(Duration::from_millis(latency_ms));
        }
        if rng.gen_bool(error_rate) {
            return Err(SampleError::raised("simulated error"));
        }
        if rng.gen_bool(true_rate) {
            Ok(SampleResult::pass())
        } else {
            Ok(SampleResult::fail("simulated failure"))
        }
    };
    let progress = |p: &TrialProgress| {
        debug!(
            executed = p.samples_executed,
            successes = p.successes,
            in_flight = p.in_flight,
            "progress"
        );
    };

    let verdict = TrialRunner::new(&config)
        .with_progress(&progress)
        .run(&executor)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("{verdict}");
        println!(
            "executed {}/{} in {} ms (config {})",
            verdict.samples_executed,
            verdict.samples_planned,
            verdict.elapsed_ms,
            verdict.config_fingerprint.get(..12).unwrap_or("-")
        );
        for (reason, count) in &verdict.failure_distribution {
            println!("  {count:>5}  {reason}");
        }
        if let Some(explanation) = &verdict.explanation {
            println!();
            print!("{}", explanation.render());
        }
    }

    if !verdict.passed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_plan(layers: &LayerArgs) -> Result<()> {
    let config = layers.resolve()?;
    let plan = PacingPlan::compute(&config.pacing, config.samples, config.max_concurrency);

    println!("Samples:              {}", config.samples);
    println!("Effective delay:      {} ms", plan.effective_delay_ms);
    println!("Effective concurrency: {}", plan.effective_concurrency);
    match plan.effective_rps {
        Some(rps) => println!("Effective throughput: {rps:.3} /s"),
        None => println!("Effective throughput: unbounded"),
    }
    if plan.estimated_duration_ms > 0 {
        println!("Estimated duration:   {} ms", plan.estimated_duration_ms);
    } else {
        println!("Estimated duration:   unknown");
    }
    for warning in &plan.warnings {
        println!("Warning: {warning:?}");
    }
    Ok(())
}

fn run_sample_size(null_rate: f64, effect: f64, confidence: f64, power: f64) -> Result<()> {
    let requirement =
        sample_size_requirement(confidence, power, effect, null_rate, null_rate - effect)?;
    println!(
        "{} samples detect a drop from {:.4} to {:.4} at {:.0}% confidence and {:.0}% power",
        requirement.required_samples,
        requirement.null_rate,
        requirement.alt_rate,
        requirement.confidence * 100.0,
        requirement.power * 100.0
    );
    Ok(())
}

fn run_threshold(
    samples: u64,
    successes: u64,
    confidence: f64,
    generated: Option<&str>,
) -> Result<()> {
    let generated_at: DateTime<Utc> = match generated {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("invalid --generated date '{date}'"))?
            .and_hms_opt(0, 0, 0)
            .context("invalid time of day")?
            .and_utc(),
        None => Utc::now(),
    };
    let baseline = Baseline::new(samples, successes, generated_at);
    let derived = baseline.derive_threshold(confidence)?;
    println!(
        "baseline {successes}/{samples} = {:.4}; min pass rate at {:.0}% confidence: {:.4}",
        derived.baseline_rate,
        derived.confidence * 100.0,
        derived.min_pass_rate
    );
    let age = baseline.age_days(Utc::now());
    if age > trialgate_core::explanation::STALE_BASELINE_DAYS {
        println!("warning: baseline is {age} days old");
    }
    Ok(())
}
