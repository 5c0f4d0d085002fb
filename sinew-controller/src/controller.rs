//! The four wire operations: validate, plan, step_done, audit.
//!
//! Nothing raises across this surface. Every failure — parse, validation,
//! semantic, execution — comes back as a structured response with an
//! `error_type`, so an external driver can branch on it mechanically.

use crate::error::{PlanError, wire_error};
use crate::plan::parse_and_validate;
use crate::state::{FlowState, OutputValidator, StepStatus};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Flow controller driven by an external agent.
///
/// The controller validates plans, manages per-flow execution state, and
/// checks every reported result against its function's declared schema and
/// ensure expressions before advancing the cursor.
#[derive(Default)]
pub struct Controller {
    flows: HashMap<String, FlowState>,
    validator: Option<Arc<dyn OutputValidator>>,
}

impl Controller {
    /// A controller without JSON-schema validation; `output_schema`
    /// declarations are inert until a validator is injected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject the JSON-schema validator used for step `output_schema`
    /// declarations.
    pub fn with_validator(mut self, validator: Arc<dyn OutputValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Validate a plan document. Returns `{valid, errors}`.
    pub fn validate(&self, plan_text: &str) -> Value {
        match parse_and_validate(plan_text) {
            Ok(_) => json!({"valid": true, "errors": []}),
            Err(err) => json!({"valid": false, "errors": [wire_error(&err)]}),
        }
    }

    /// Create an execution plan for one flow and return its first step
    /// descriptor.
    pub fn plan(&mut self, plan_text: &str, flow_name: &str, inputs: Map<String, Value>) -> Value {
        let doc = match parse_and_validate(plan_text) {
            Ok(doc) => Arc::new(doc),
            Err(err) => return error_response(&err),
        };
        let mut state = match FlowState::new(doc, flow_name, inputs) {
            Ok(state) => state,
            Err(err) => return error_response(&err),
        };

        let first = match state.current_step_descriptor() {
            Ok(Some(descriptor)) => descriptor,
            // Validation guarantees at least one step; an empty descriptor
            // here means the plan changed under us.
            Ok(None) => {
                return error_response(&PlanError::Execution(
                    "flow has no steps to execute".into(),
                ));
            }
            Err(err) => return error_response(&err),
        };

        tracing::debug!(flow_id = %state.flow_id(), flow = flow_name, "flow planned");
        self.flows.insert(state.flow_id().to_string(), state);
        first
    }

    /// Report a completed step. Returns the next step descriptor, a
    /// `schema_failed`/`ensure_failed` retry envelope, a
    /// `retries_exhausted` error, or flow completion with output and
    /// trace.
    pub fn step_done(&mut self, flow_id: &str, step_id: &str, result: Value) -> Value {
        let Some(state) = self.flows.get_mut(flow_id) else {
            return json!({
                "status": "error",
                "error_type": "flow_not_found",
                "message": format!("no active flow with id '{flow_id}'"),
            });
        };

        let (status, violations) =
            match state.process_step_result(step_id, result, self.validator.as_deref()) {
                Ok(outcome) => outcome,
                Err(err) => return error_response(&err),
            };

        match status {
            StepStatus::RetriesExhausted => json!({
                "status": "error",
                "error_type": "retries_exhausted",
                "flow_id": flow_id,
                "step_id": step_id,
                "message": format!("step '{step_id}' exhausted all retries"),
                "violations": violations,
            }),
            StepStatus::SchemaFailed | StepStatus::EnsureFailed => {
                // The cursor has not advanced; re-issue the same step with
                // updated retries_remaining and the violations attached.
                let descriptor = match state.current_step_descriptor() {
                    Ok(Some(descriptor)) => descriptor,
                    Ok(None) => {
                        return error_response(&PlanError::Execution(
                            "flow advanced unexpectedly".into(),
                        ));
                    }
                    Err(err) => return error_response(&err),
                };
                let mut envelope = descriptor;
                envelope["status"] = json!(status.as_str());
                envelope["violations"] = json!(violations);
                envelope
            }
            StepStatus::Ok => match state.current_step_descriptor() {
                Ok(Some(next)) => next,
                Ok(None) => json!({
                    "status": "complete",
                    "flow_id": flow_id,
                    "output": state.final_output().cloned().unwrap_or(Value::Null),
                    "trace": state.records(),
                    "total_duration_ms": state.total_duration_ms(),
                }),
                Err(err) => error_response(&err),
            },
        }
    }

    /// Execution trace snapshot for a flow, complete or in flight.
    pub fn audit(&self, flow_id: &str) -> Value {
        match self.flows.get(flow_id) {
            Some(state) => state.audit(),
            None => json!({
                "error_type": "flow_not_found",
                "message": format!("no active flow with id '{flow_id}'"),
            }),
        }
    }
}

fn error_response(err: &PlanError) -> Value {
    let mut response = wire_error(err);
    response["status"] = json!("error");
    response
}
