//! Time and cost envelope for step and flow invocations.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BudgetState {
    started_at: Instant,
    spent_usd: Decimal,
}

/// A wall-clock and cost budget for a step or flow invocation.
///
/// Either ceiling may be absent; an unset axis is unbounded. The runtime
/// counters (elapsed clock, accumulated cost) live behind a shared handle:
/// `Clone` hands out the *same* counters, which is how a flow budget
/// accumulates cost across every step executed inside it. [`Budget::fresh`]
/// restarts the counters with the same ceilings — the executor calls it once
/// per invocation so a budget declared at step-build time does not decay
/// between calls.
///
/// # Examples
///
/// ```
/// use sinew_core::Budget;
/// use rust_decimal::Decimal;
///
/// let budget = Budget::new(Some(5_000), Some(Decimal::new(1, 2))); // 5s, $0.01
/// assert!(budget.remaining().is_some());
/// assert!(!budget.is_cost_exceeded());
///
/// budget.record_cost(Decimal::new(2, 2)); // $0.02
/// assert!(budget.is_cost_exceeded());
/// ```
#[derive(Debug, Clone)]
pub struct Budget {
    ms: Option<u64>,
    usd: Option<Decimal>,
    state: Arc<Mutex<BudgetState>>,
}

impl Budget {
    /// Create a budget with the given ceilings. The clock starts now.
    pub fn new(ms: Option<u64>, usd: Option<Decimal>) -> Self {
        Self {
            ms,
            usd,
            state: Arc::new(Mutex::new(BudgetState {
                started_at: Instant::now(),
                spent_usd: Decimal::ZERO,
            })),
        }
    }

    /// A budget with only a wall-clock ceiling, in milliseconds.
    pub fn from_ms(ms: u64) -> Self {
        Self::new(Some(ms), None)
    }

    /// A budget with only a cost ceiling, in USD.
    pub fn from_usd(usd: Decimal) -> Self {
        Self::new(None, Some(usd))
    }

    /// The wall-clock ceiling in milliseconds, if any.
    pub fn ms(&self) -> Option<u64> {
        self.ms
    }

    /// The cost ceiling in USD, if any.
    pub fn usd(&self) -> Option<Decimal> {
        self.usd
    }

    /// Remaining wall-clock time, saturating at zero.
    ///
    /// `None` means the time axis is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        let ms = self.ms?;
        let elapsed = self.state.lock().expect("budget lock").started_at.elapsed();
        Some(Duration::from_millis(ms).saturating_sub(elapsed))
    }

    /// Whether the time ceiling exists and has fully elapsed.
    pub fn is_time_exhausted(&self) -> bool {
        self.remaining().is_some_and(|d| d.is_zero())
    }

    /// Accumulate a cost charge against this budget.
    pub fn record_cost(&self, usd: Decimal) {
        self.state.lock().expect("budget lock").spent_usd += usd;
    }

    /// Total cost accumulated so far.
    pub fn spent(&self) -> Decimal {
        self.state.lock().expect("budget lock").spent_usd
    }

    /// Whether cumulative cost has reached or exceeded the USD ceiling.
    ///
    /// Always false when the cost axis is unbounded. Once true, never
    /// transitions back: cost only accumulates.
    pub fn is_cost_exceeded(&self) -> bool {
        match self.usd {
            Some(cap) => self.spent() >= cap,
            None => false,
        }
    }

    /// A new envelope with the same ceilings, restarted clock, and zero
    /// spend. Counters are not shared with `self`.
    pub fn fresh(&self) -> Self {
        Self::new(self.ms, self.usd)
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ms {
            Some(ms) => write!(f, "ms={ms}")?,
            None => write!(f, "ms=unbounded")?,
        }
        match self.usd {
            Some(usd) => write!(f, " usd={usd}")?,
            None => write!(f, " usd=unbounded")?,
        }
        write!(f, " spent={}", self.spent())
    }
}
