//! Controller error types and wire translation.
//!
//! The controller's four operations never let an error cross the wire
//! surface: every failure is translated into a structured response through
//! [`wire_error`]. Internal stack detail never leaks.

use serde_json::{Value, json};
use thiserror::Error;

/// Failures raised while parsing, validating, or driving a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan document could not be parsed at all.
    #[error("plan parse error: {0}")]
    Parse(String),

    /// The document parsed but violates the plan structure.
    #[error("{message}")]
    Validation {
        /// Dot-notation path to the offending element.
        path: String,
        /// What was wrong.
        message: String,
        /// How to fix it.
        suggestion: String,
    },

    /// Structurally valid but semantically broken (undefined references).
    #[error("{message}")]
    Semantic {
        /// Dot-notation path to the offending element.
        path: String,
        /// What was wrong.
        message: String,
    },

    /// Runtime failure while driving a flow (cycles, bad references,
    /// mis-sequenced steps).
    #[error("{0}")]
    Execution(String),
}

impl PlanError {
    /// Shorthand for a validation error.
    pub fn validation(
        path: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Shorthand for a semantic error.
    pub fn semantic(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Semantic {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Translate any plan error into a structured wire response.
pub fn wire_error(err: &PlanError) -> Value {
    match err {
        PlanError::Parse(message) => json!({
            "success": false,
            "error_type": "plan_parse_error",
            "message": format!("YAML syntax error: {message}"),
            "suggestion": "Check YAML syntax: indentation, colons, quoting.",
        }),
        PlanError::Validation {
            path,
            message,
            suggestion,
        } => json!({
            "success": false,
            "error_type": "plan_validation_error",
            "path": path,
            "message": message,
            "suggestion": suggestion,
        }),
        PlanError::Semantic { path, message } => json!({
            "success": false,
            "error_type": "plan_semantic_error",
            "path": path,
            "message": message,
        }),
        PlanError::Execution(message) => json!({
            "success": false,
            "error_type": "execution_error",
            "message": message,
        }),
    }
}
