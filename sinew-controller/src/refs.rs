//! The `$` reference language wiring step inputs to earlier results.
//!
//! Supported forms:
//!
//! ```text
//! $.input.<field>                → flow-level input
//! $.steps.<id>.output            → an earlier step's whole output
//! $.steps.<id>.output.<field>…   → a field of an earlier step's output
//! anything else                  → literal string, passed through
//! ```

use crate::error::PlanError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Resolve one reference against the flow inputs and accumulated step
/// outputs.
pub fn resolve_ref(
    reference: &str,
    flow_inputs: &Map<String, Value>,
    step_outputs: &BTreeMap<String, Value>,
) -> Result<Value, PlanError> {
    if !reference.starts_with('$') {
        return Ok(Value::String(reference.to_string()));
    }

    // Strip the literal "$." prefix; "$" alone is malformed.
    let Some(rest) = reference.strip_prefix("$.") else {
        return Err(PlanError::Execution(format!(
            "malformed $ reference: {reference:?}"
        )));
    };
    let parts: Vec<&str> = rest.split('.').collect();

    match parts.as_slice() {
        ["input"] => Err(PlanError::Execution(format!(
            "$.input requires a field name: {reference:?}"
        ))),
        ["input", field, ..] => flow_inputs.get(*field).cloned().ok_or_else(|| {
            PlanError::Execution(format!("$.input.{field} not found in flow inputs"))
        }),
        ["steps", step_id, "output", fields @ ..] => {
            let mut current = step_outputs.get(*step_id).ok_or_else(|| {
                PlanError::Execution(format!(
                    "$.steps.{step_id} not yet executed; check depends_on ordering"
                ))
            })?;
            for field in fields {
                current = current.get(*field).ok_or_else(|| {
                    PlanError::Execution(format!(
                        "step '{step_id}' output has no field '{field}'"
                    ))
                })?;
            }
            Ok(current.clone())
        }
        ["steps", ..] => Err(PlanError::Execution(format!(
            "expected '$.steps.<id>.output[.<field>]', got {reference:?}"
        ))),
        [prefix, ..] => Err(PlanError::Execution(format!(
            "unknown $ prefix '{prefix}' in {reference:?}"
        ))),
        [] => Err(PlanError::Execution(format!(
            "empty $ reference: {reference:?}"
        ))),
    }
}

/// Resolve every input reference of a step, in parameter name order.
pub fn resolve_inputs(
    input_refs: &BTreeMap<String, String>,
    flow_inputs: &Map<String, Value>,
    step_outputs: &BTreeMap<String, Value>,
) -> Result<Map<String, Value>, PlanError> {
    let mut resolved = Map::new();
    for (param, reference) in input_refs {
        resolved.insert(
            param.clone(),
            resolve_ref(reference, flow_inputs, step_outputs)?,
        );
    }
    Ok(resolved)
}

/// The step id an implicit `$.steps.<id>.…` reference depends on, if the
/// reference has that form.
pub fn implicit_dependency(reference: &str) -> Option<&str> {
    reference
        .strip_prefix("$.steps.")
        .and_then(|rest| rest.split('.').next())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> Map<String, Value> {
        json!({"document": "the text", "limit": 3})
            .as_object()
            .unwrap()
            .clone()
    }

    fn outputs() -> BTreeMap<String, Value> {
        BTreeMap::from([(
            "s1".to_string(),
            json!({"summary": "short", "meta": {"words": 2}}),
        )])
    }

    #[test]
    fn literals_pass_through() {
        let value = resolve_ref("just text", &inputs(), &outputs()).unwrap();
        assert_eq!(value, json!("just text"));
    }

    #[test]
    fn input_fields_resolve() {
        assert_eq!(
            resolve_ref("$.input.document", &inputs(), &outputs()).unwrap(),
            json!("the text")
        );
        assert!(resolve_ref("$.input.missing", &inputs(), &outputs()).is_err());
        assert!(resolve_ref("$.input", &inputs(), &outputs()).is_err());
    }

    #[test]
    fn step_outputs_resolve_whole_and_fields() {
        assert_eq!(
            resolve_ref("$.steps.s1.output", &inputs(), &outputs()).unwrap(),
            json!({"summary": "short", "meta": {"words": 2}})
        );
        assert_eq!(
            resolve_ref("$.steps.s1.output.summary", &inputs(), &outputs()).unwrap(),
            json!("short")
        );
        assert_eq!(
            resolve_ref("$.steps.s1.output.meta.words", &inputs(), &outputs()).unwrap(),
            json!(2)
        );
    }

    #[test]
    fn unexecuted_step_is_an_ordering_error() {
        let err = resolve_ref("$.steps.ghost.output", &inputs(), &outputs()).unwrap_err();
        assert!(err.to_string().contains("not yet executed"));
    }

    #[test]
    fn malformed_references_error() {
        assert!(resolve_ref("$.steps.s1", &inputs(), &outputs()).is_err());
        assert!(resolve_ref("$.steps.s1.result", &inputs(), &outputs()).is_err());
        assert!(resolve_ref("$.elsewhere.x", &inputs(), &outputs()).is_err());
        assert!(resolve_ref("$", &inputs(), &outputs()).is_err());
    }

    #[test]
    fn implicit_dependencies_detected() {
        assert_eq!(implicit_dependency("$.steps.s1.output.x"), Some("s1"));
        assert_eq!(implicit_dependency("$.steps.s2.output"), Some("s2"));
        assert_eq!(implicit_dependency("$.input.document"), None);
        assert_eq!(implicit_dependency("literal"), None);
    }
}
