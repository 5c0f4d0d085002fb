//! The error taxonomy for the sinew runtime.
//!
//! Every failure the runtime can surface shares the single root
//! [`SinewError`]. Propagation policy:
//!
//! - precondition failures fail fast and mutate no shared state;
//! - parse and postcondition failures are locally recoverable within a
//!   step's retry ceiling, and surface only when retries are exhausted;
//! - budget and compile errors are immediately fatal;
//! - concurrency primitives propagate the first failure their mode
//!   contracts (all → first, any → last, at-least-N → first if short);
//! - the controller never lets any of these cross its wire surface — it
//!   translates them into structured error responses.

use crate::budget::Budget;
use crate::id::ReviewId;
use thiserror::Error;

/// Root error for every failure mode in the runtime.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SinewError {
    /// Static misuse detected at declaration or invocation time.
    #[error("compile error at {location}: {reason}")]
    Compile {
        /// Where the misuse was detected (step name, contract name, field).
        location: String,
        /// What was wrong.
        reason: String,
    },

    /// A `require` predicate evaluated false before the provider was invoked.
    #[error("precondition failed in '{step}': {condition}")]
    Precondition {
        /// The step whose precondition failed.
        step: String,
        /// Label of the failing condition.
        condition: String,
    },

    /// Retries exhausted with unresolved `ensure` violations.
    #[error("postcondition failed in '{step}' after {} attempts: {}", history.len(), violations.join("; "))]
    Postcondition {
        /// The step whose postconditions failed.
        step: String,
        /// Violations from the final attempt.
        violations: Vec<String>,
        /// Violations per attempt, in attempt order.
        history: Vec<Vec<String>>,
    },

    /// Retries exhausted with the provider output unparseable against the
    /// contract.
    #[error("parse failure in '{step}': {message}")]
    Parse {
        /// The step whose output failed to parse.
        step: String,
        /// The raw output of the final attempt, when one was extracted.
        raw_output: String,
        /// Why parsing failed.
        message: String,
    },

    /// A time or cost ceiling was hit.
    #[error("budget exceeded in '{step}': {budget}")]
    Budget {
        /// The step that ran out of budget.
        step: String,
        /// The envelope that was exhausted.
        budget: Budget,
    },

    /// A refinement loop hit its iteration ceiling without converging.
    #[error("convergence failure in '{step}': did not converge after {max_iterations} iterations")]
    Convergence {
        /// The refined step.
        step: String,
        /// The iteration ceiling.
        max_iterations: usize,
        /// Every iteration's output, in order.
        history: Vec<serde_json::Value>,
    },

    /// A quorum did not reach its agreement threshold.
    #[error("consensus failure in '{step}': {quorum} invocations, needed {threshold} agreeing")]
    Consensus {
        /// The quorum step.
        step: String,
        /// Number of concurrent invocations.
        quorum: usize,
        /// Required size of the agreeing partition.
        threshold: usize,
        /// All successful outputs, for diagnosis.
        outputs: Vec<serde_json::Value>,
    },

    /// A parallel validator returned false over the collected results.
    #[error("parallel validation failed: {message}")]
    ParallelValidation {
        /// What the validator rejected.
        message: String,
    },

    /// A human review window elapsed under the raise-on-timeout policy.
    #[error("review timed out: {review_id}")]
    HitlTimeout {
        /// The review that expired.
        review_id: ReviewId,
    },

    /// Test-mode samples disagreed beyond the stability threshold.
    #[error("stability assertion failed: required {:.0}% agreement, got {:.0}%", threshold * 100.0, agreement * 100.0)]
    Stability {
        /// Required agreement fraction.
        threshold: f64,
        /// Observed agreement fraction.
        agreement: f64,
    },
}

impl SinewError {
    /// Shorthand for a [`SinewError::Compile`].
    pub fn compile(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether the executor may retry past this error within a step.
    ///
    /// Only parse-class and postcondition-class failures are locally
    /// recoverable; everything else is fatal to the invocation.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Postcondition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = SinewError::Precondition {
            step: "classify".into(),
            condition: "text_not_empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "precondition failed in 'classify': text_not_empty"
        );

        let err = SinewError::Postcondition {
            step: "classify".into(),
            violations: vec!["a".into(), "b".into()],
            history: vec![vec!["a".into()], vec!["a".into(), "b".into()]],
        };
        assert_eq!(
            err.to_string(),
            "postcondition failed in 'classify' after 2 attempts: a; b"
        );

        let err = SinewError::Stability {
            threshold: 0.9,
            agreement: 0.6,
        };
        assert_eq!(
            err.to_string(),
            "stability assertion failed: required 90% agreement, got 60%"
        );
    }

    #[test]
    fn recoverability_classes() {
        assert!(
            SinewError::Parse {
                step: "s".into(),
                raw_output: String::new(),
                message: "bad json".into(),
            }
            .is_locally_recoverable()
        );
        assert!(
            !SinewError::Budget {
                step: "s".into(),
                budget: Budget::from_ms(10),
            }
            .is_locally_recoverable()
        );
        assert!(
            !SinewError::Compile {
                location: "s".into(),
                reason: "r".into(),
            }
            .is_locally_recoverable()
        );
    }
}
