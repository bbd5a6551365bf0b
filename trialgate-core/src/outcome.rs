//! Sample outcomes: what one trial produced.
//!
//! An executor reports a [`SampleResult`] (pass/fail plus optional cost and
//! per-criterion detail) or returns a [`SampleError`]. The runner folds both
//! into a [`SampleOutcome`], which is what the aggregator records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tagged result of one executed sample. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleOutcome {
    Success,
    Failure { reason: String },
    Errored { cause: String },
}

impl SampleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SampleOutcome::Success)
    }

    /// Key used in the failure distribution; `None` for successes.
    pub fn failure_key(&self) -> Option<String> {
        match self {
            SampleOutcome::Success => None,
            SampleOutcome::Failure { reason } => Some(reason.clone()),
            SampleOutcome::Errored { cause } => Some(format!("error: {cause}")),
        }
    }
}

/// Named sub-check evaluated within one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub name: String,
    pub passed: bool,
}

/// What an executor reports for a sample that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    passed: bool,
    failure_reason: Option<String>,
    tokens_used: Option<u64>,
    criteria: Vec<CriterionResult>,
}

/// Reason recorded when an executor fails a sample without saying why.
pub const UNSPECIFIED_FAILURE: &str = "unspecified failure";

impl SampleResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failure_reason: None,
            tokens_used: None,
            criteria: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure_reason: Some(reason.into()),
            tokens_used: None,
            criteria: Vec::new(),
        }
    }

    pub fn from_bool(passed: bool) -> Self {
        Self {
            passed,
            ..Self::pass()
        }
    }

    /// Tokens consumed by this sample (dynamic cost mode).
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_criterion(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.criteria.push(CriterionResult {
            name: name.into(),
            passed,
        });
        self
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn tokens_used(&self) -> Option<u64> {
        self.tokens_used
    }

    pub fn criteria(&self) -> &[CriterionResult] {
        &self.criteria
    }

    /// The outcome this result records as.
    ///
    /// A failing result without an explicit reason falls back to the names of
    /// its failed criteria, then to [`UNSPECIFIED_FAILURE`].
    pub fn to_outcome(&self) -> SampleOutcome {
        if self.passed {
            return SampleOutcome::Success;
        }
        let reason = match &self.failure_reason {
            Some(reason) => reason.clone(),
            None => {
                let failed: Vec<&str> = self
                    .criteria
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.name.as_str())
                    .collect();
                if failed.is_empty() {
                    UNSPECIFIED_FAILURE.to_string()
                } else {
                    format!("failed criteria: {}", failed.join(", "))
                }
            }
        };
        SampleOutcome::Failure { reason }
    }
}

impl From<bool> for SampleResult {
    fn from(passed: bool) -> Self {
        Self::from_bool(passed)
    }
}

/// The executor could not produce a result: it raised an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("{message}")]
    Raised { message: String },
    #[error("sample panicked: {message}")]
    Panicked { message: String },
}

impl SampleError {
    pub fn raised(message: impl Into<String>) -> Self {
        SampleError::Raised {
            message: message.into(),
        }
    }

    /// Capture any error as a raised sample error, keeping its source chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        SampleError::Raised { message }
    }

    pub fn message(&self) -> &str {
        match self {
            SampleError::Raised { message } | SampleError::Panicked { message } => message,
        }
    }

    /// The outcome recorded when the exception policy fails the sample.
    pub fn to_outcome(&self) -> SampleOutcome {
        SampleOutcome::Errored {
            cause: self.to_string(),
        }
    }
}
