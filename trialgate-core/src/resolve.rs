//! Configuration resolution with documented precedence.
//!
//! Each source contributes a [`PartialTrialConfig`]; later layers win:
//!
//! 1. framework default ([`TrialConfig::default`])
//! 2. declared default (a `trial.toml` next to the test, or code)
//! 3. system property (`trialgate.minPassRate = 0.9`)
//! 4. environment variable (`TRIALGATE_MIN_PASS_RATE=0.9`)
//! 5. explicit override
//!
//! Resolution runs once, before a [`TrialConfig`] is handed to the runner.
//! Environment and properties are passed in explicitly so resolution stays
//! a pure function of its inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{
    BudgetExhaustedBehavior, ConfigError, ExceptionPolicy, ThresholdOrigin, TokenCharge,
    TrialConfig,
};

/// Prefix for environment variables.
pub const ENV_PREFIX: &str = "TRIALGATE_";
/// Prefix for property keys.
pub const PROPERTY_PREFIX: &str = "trialgate.";

/// One configuration layer. `None` leaves the lower layer's value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialTrialConfig {
    pub samples: Option<u64>,
    pub min_pass_rate: Option<f64>,
    pub threshold_origin: Option<ThresholdOrigin>,
    pub time_budget_ms: Option<u64>,
    pub token_budget: Option<u64>,
    pub token_charge_per_sample: Option<u64>,
    pub dynamic_token_charge: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub max_per_second: Option<u32>,
    pub max_per_minute: Option<u32>,
    pub max_per_hour: Option<u32>,
    pub min_delay_ms: Option<u64>,
    pub estimated_latency_ms: Option<u64>,
    pub on_exception: Option<ExceptionPolicy>,
    pub on_budget_exhausted: Option<BudgetExhaustedBehavior>,
    pub max_example_failures: Option<usize>,
    pub max_ignored_retries: Option<u64>,
    pub early_termination: Option<bool>,
    pub confidence: Option<f64>,
    pub explain: Option<bool>,
    /// Scales the resolved sample count (rounded up, at least 1).
    pub samples_multiplier: Option<f64>,
}

macro_rules! overlay_fields {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}

/// `minPassRate` -> `min_pass_rate`
fn camel_to_snake(camel: &str) -> String {
    let mut snake = String::with_capacity(camel.len() + 4);
    for ch in camel.chars() {
        if ch.is_ascii_uppercase() {
            snake.push('_');
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

impl PartialTrialConfig {
    /// Set one field by its snake_case name. Returns `Ok(false)` for names
    /// that are not configuration fields.
    pub fn set_field(&mut self, field: &str, key: &str, raw: &str) -> Result<bool, ConfigError> {
        match field {
            "samples" => self.samples = Some(parse_value(key, raw)?),
            "min_pass_rate" => self.min_pass_rate = Some(parse_value(key, raw)?),
            "threshold_origin" => self.threshold_origin = Some(parse_value(key, raw)?),
            "time_budget_ms" => self.time_budget_ms = Some(parse_value(key, raw)?),
            "token_budget" => self.token_budget = Some(parse_value(key, raw)?),
            "token_charge_per_sample" => {
                self.token_charge_per_sample = Some(parse_value(key, raw)?)
            }
            "dynamic_token_charge" => self.dynamic_token_charge = Some(parse_flag(key, raw)?),
            "max_concurrency" => self.max_concurrency = Some(parse_value(key, raw)?),
            "max_per_second" => self.max_per_second = Some(parse_value(key, raw)?),
            "max_per_minute" => self.max_per_minute = Some(parse_value(key, raw)?),
            "max_per_hour" => self.max_per_hour = Some(parse_value(key, raw)?),
            "min_delay_ms" => self.min_delay_ms = Some(parse_value(key, raw)?),
            "estimated_latency_ms" => self.estimated_latency_ms = Some(parse_value(key, raw)?),
            "on_exception" => self.on_exception = Some(parse_value(key, raw)?),
            "on_budget_exhausted" => self.on_budget_exhausted = Some(parse_value(key, raw)?),
            "max_example_failures" => self.max_example_failures = Some(parse_value(key, raw)?),
            "max_ignored_retries" => self.max_ignored_retries = Some(parse_value(key, raw)?),
            "early_termination" => self.early_termination = Some(parse_flag(key, raw)?),
            "confidence" => self.confidence = Some(parse_value(key, raw)?),
            "explain" => self.explain = Some(parse_flag(key, raw)?),
            "samples_multiplier" => self.samples_multiplier = Some(parse_value(key, raw)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Layer from `TRIALGATE_*` environment variables.
    ///
    /// Takes the variables as an iterator; pass `std::env::vars()` for the
    /// process environment. Unknown `TRIALGATE_*` keys are logged and skipped.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = Self::default();
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = rest.to_ascii_lowercase();
            if !layer.set_field(&field, key, value.as_ref())? {
                warn!(key, "ignoring unknown environment variable");
            }
        }
        Ok(layer)
    }

    /// Layer from the current process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_vars(std::env::vars())
    }

    /// Layer from `trialgate.*` properties with camelCase names.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut layer = Self::default();
        for (key, value) in properties {
            let Some(rest) = key.strip_prefix(PROPERTY_PREFIX) else {
                continue;
            };
            if !layer.set_field(&camel_to_snake(rest), key, value)? {
                warn!(key = key.as_str(), "ignoring unknown property");
            }
        }
        Ok(layer)
    }

    /// Parse a TOML layer with snake_case keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML layer from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Overwrite every field `higher` sets.
    pub fn overlay(&mut self, higher: &PartialTrialConfig) {
        overlay_fields!(
            self,
            higher,
            samples,
            min_pass_rate,
            threshold_origin,
            time_budget_ms,
            token_budget,
            token_charge_per_sample,
            dynamic_token_charge,
            max_concurrency,
            max_per_second,
            max_per_minute,
            max_per_hour,
            min_delay_ms,
            estimated_latency_ms,
            on_exception,
            on_budget_exhausted,
            max_example_failures,
            max_ignored_retries,
            early_termination,
            confidence,
            explain,
            samples_multiplier,
        );
    }

    /// Write every set field into `config`. The multiplier is not applied here.
    pub fn apply_to(&self, config: &mut TrialConfig) {
        macro_rules! assign {
            ($from:ident, $to:ident; $($src:ident => $($dst:ident).+),+ $(,)?) => {
                $(
                    if let Some(value) = $from.$src {
                        $to.$($dst).+ = value;
                    }
                )+
            };
        }
        let layer = self;
        assign!(
            layer, config;
            samples => samples,
            min_pass_rate => min_pass_rate,
            threshold_origin => threshold_origin,
            time_budget_ms => time_budget_ms,
            token_budget => token_budget,
            max_concurrency => max_concurrency,
            max_per_second => pacing.max_per_second,
            max_per_minute => pacing.max_per_minute,
            max_per_hour => pacing.max_per_hour,
            min_delay_ms => pacing.min_delay_ms,
            estimated_latency_ms => pacing.estimated_latency_ms,
            on_exception => on_exception,
            on_budget_exhausted => on_budget_exhausted,
            max_example_failures => max_example_failures,
            early_termination => early_termination,
            confidence => confidence,
            explain => explain,
        );
        if self.max_ignored_retries.is_some() {
            config.max_ignored_retries = self.max_ignored_retries;
        }
        match (self.dynamic_token_charge, self.token_charge_per_sample) {
            (Some(true), _) => config.token_charge = TokenCharge::Dynamic,
            (_, Some(per_sample)) => config.token_charge = TokenCharge::Static { per_sample },
            (Some(false), None) if config.token_charge == TokenCharge::Dynamic => {
                config.token_charge = TokenCharge::default()
            }
            _ => {}
        }
    }
}

/// All configuration sources for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub declared: PartialTrialConfig,
    pub properties: PartialTrialConfig,
    pub env: PartialTrialConfig,
    pub explicit: PartialTrialConfig,
}

impl ConfigLayers {
    /// Merge in precedence order: explicit > env > properties > declared.
    pub fn merged(&self) -> PartialTrialConfig {
        let mut merged = self.declared.clone();
        merged.overlay(&self.properties);
        merged.overlay(&self.env);
        merged.overlay(&self.explicit);
        merged
    }
}

/// Resolve layers over the framework default and validate the result.
pub fn resolve(layers: &ConfigLayers) -> Result<TrialConfig, ConfigError> {
    resolve_onto(TrialConfig::default(), layers)
}

/// Resolve layers over a caller-supplied base (e.g. one carrying a baseline
/// or covariates) and validate the result.
pub fn resolve_onto(
    mut config: TrialConfig,
    layers: &ConfigLayers,
) -> Result<TrialConfig, ConfigError> {
    let merged = layers.merged();
    merged.apply_to(&mut config);

    if let Some(multiplier) = merged.samples_multiplier {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ConfigError::InvalidMultiplier(multiplier));
        }
        let scaled = (config.samples as f64 * multiplier).ceil().max(1.0);
        config.samples = scaled as u64;
    }

    config.validate()?;
    debug!(
        samples = config.samples,
        min_pass_rate = config.min_pass_rate,
        fingerprint = %config.fingerprint(),
        "resolved trial config"
    );
    Ok(config)
}
