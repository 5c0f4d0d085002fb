//! Iterative refinement: an outer convergence loop around one step.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sinew_core::{Inputs, SinewError};
use sinew_exec::Step;

/// Re-invoke `step` until `until` accepts its output.
///
/// Each iteration appends one feedback sentence — produced by `feedback`
/// from the previous output — to the step's context and re-invokes it, so
/// the next prompt carries the critique. `until` and `feedback` are plain
/// synchronous closures and must not themselves invoke LLM-backed steps.
///
/// The step's own budget applies per iteration (it restarts with each
/// invocation); the ambient flow budget spans the whole loop. Exhausting
/// `max_iterations` fails with [`SinewError::Convergence`] carrying every
/// iteration's output.
pub async fn refine<T>(
    step: &Step<T>,
    inputs: Inputs,
    until: impl Fn(&T) -> bool,
    feedback: impl Fn(&T) -> String,
    max_iterations: usize,
) -> Result<T, SinewError>
where
    T: DeserializeOwned + Serialize,
{
    let mut history: Vec<Value> = Vec::new();
    let mut extra_context: Vec<String> = Vec::new();

    for iteration in 0..max_iterations {
        tracing::debug!(step = %step.name(), iteration = iteration + 1, "refinement iteration");
        let output = step
            .call_with_context(inputs.clone(), &extra_context)
            .await?;
        history.push(serde_json::to_value(&output).unwrap_or(Value::Null));

        if until(&output) {
            return Ok(output);
        }

        let critique = feedback(&output);
        extra_context = vec![format!(
            "Previous output had the following issues: {critique}. Fix these and regenerate."
        )];
    }

    Err(SinewError::Convergence {
        step: step.name().to_string(),
        max_iterations,
        history,
    })
}
