//! Budget tracking for time and token consumption across samples.
//!
//! A tracker belongs to one scope (method, class, or suite) and may have an
//! enclosing parent. Charging a nested scope also charges every enclosing
//! scope, and exhaustion anywhere in the chain is exhaustion for the sample.
//!
//! Exhaustion is latched: once a scope has tripped it stays exhausted. When
//! concurrent samples race to trip a budget, the only guarantee is that no
//! sample starts after exhaustion has been observed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Level at which a budget applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetScope {
    Method,
    Class,
    Suite,
}

/// Which budget dimension ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetDimension {
    Time,
    Tokens,
}

/// Where exhaustion was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exhaustion {
    pub scope: BudgetScope,
    pub dimension: BudgetDimension,
}

/// Limits for one scope. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub time_budget_ms: u64,
    pub token_budget: u64,
}

impl BudgetLimits {
    pub fn new(time_budget_ms: u64, token_budget: u64) -> Self {
        Self {
            time_budget_ms,
            token_budget,
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.time_budget_ms == 0 && self.token_budget == 0
    }
}

/// Point-in-time view of a tracker and its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub scope: BudgetScope,
    pub time_used_ms: u64,
    pub tokens_used: u64,
    /// `None` when the time dimension is unlimited.
    pub remaining_time_ms: Option<u64>,
    /// `None` when the token dimension is unlimited.
    pub remaining_tokens: Option<u64>,
    /// Number of charge calls applied to this scope.
    pub charges: u64,
    /// True when this scope or any enclosing scope is exhausted.
    pub exhausted: bool,
    pub exhausted_by: Option<Exhaustion>,
}

#[derive(Debug, Default)]
struct Usage {
    time_ms: u64,
    tokens: u64,
    charges: u64,
    tripped: Option<BudgetDimension>,
}

/// Thread-safe budget tracker for one scope.
#[derive(Debug)]
pub struct BudgetTracker {
    scope: BudgetScope,
    limits: BudgetLimits,
    usage: Mutex<Usage>,
    parent: Option<Arc<BudgetTracker>>,
}

impl BudgetTracker {
    pub fn new(scope: BudgetScope, limits: BudgetLimits) -> Self {
        Self {
            scope,
            limits,
            usage: Mutex::new(Usage::default()),
            parent: None,
        }
    }

    /// Nest this tracker inside an enclosing scope.
    pub fn with_parent(mut self, parent: Arc<BudgetTracker>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn scope(&self) -> BudgetScope {
        self.scope
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    pub fn parent(&self) -> Option<&Arc<BudgetTracker>> {
        self.parent.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add consumption to this scope and every enclosing scope.
    pub fn charge(&self, time_ms: u64, tokens: u64) -> BudgetSnapshot {
        self.charge_local(time_ms, tokens);
        if let Some(parent) = &self.parent {
            parent.charge(time_ms, tokens);
        }
        self.snapshot()
    }

    fn charge_local(&self, time_ms: u64, tokens: u64) {
        let mut usage = self.lock();
        usage.time_ms = usage.time_ms.saturating_add(time_ms);
        usage.tokens = usage.tokens.saturating_add(tokens);
        usage.charges += 1;
        if usage.tripped.is_none() {
            usage.tripped = self.tripped_dimension(&usage);
            if let Some(dimension) = usage.tripped {
                warn!(
                    scope = ?self.scope,
                    dimension = ?dimension,
                    time_used_ms = usage.time_ms,
                    tokens_used = usage.tokens,
                    "budget exhausted"
                );
            }
        }
    }

    fn tripped_dimension(&self, usage: &Usage) -> Option<BudgetDimension> {
        if self.limits.time_budget_ms > 0 && usage.time_ms >= self.limits.time_budget_ms {
            Some(BudgetDimension::Time)
        } else if self.limits.token_budget > 0 && usage.tokens >= self.limits.token_budget {
            Some(BudgetDimension::Tokens)
        } else {
            None
        }
    }

    /// Non-blocking view of exhaustion across the chain.
    pub fn is_exhausted(&self) -> bool {
        self.exhaustion().is_some()
    }

    /// First exhausted scope in the chain, innermost first.
    pub fn exhaustion(&self) -> Option<Exhaustion> {
        let local = self.lock().tripped;
        match local {
            Some(dimension) => Some(Exhaustion {
                scope: self.scope,
                dimension,
            }),
            None => self.parent.as_ref().and_then(|p| p.exhaustion()),
        }
    }

    /// Whether every scope in the chain can absorb `tokens` more without
    /// overrunning its token budget.
    pub fn can_afford(&self, tokens: u64) -> bool {
        let fits = {
            let usage = self.lock();
            self.limits.token_budget == 0
                || usage.tokens.saturating_add(tokens) <= self.limits.token_budget
        };
        fits && self.parent.as_ref().map_or(true, |p| p.can_afford(tokens))
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let (time_used_ms, tokens_used, charges) = {
            let usage = self.lock();
            (usage.time_ms, usage.tokens, usage.charges)
        };
        let exhausted_by = self.exhaustion();
        BudgetSnapshot {
            scope: self.scope,
            time_used_ms,
            tokens_used,
            remaining_time_ms: (self.limits.time_budget_ms > 0)
                .then(|| self.limits.time_budget_ms.saturating_sub(time_used_ms)),
            remaining_tokens: (self.limits.token_budget > 0)
                .then(|| self.limits.token_budget.saturating_sub(tokens_used)),
            charges,
            exhausted: exhausted_by.is_some(),
            exhausted_by,
        }
    }
}
