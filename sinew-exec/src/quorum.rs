//! Quorum composition: N concurrent executions, threshold agreement.

use crate::executor::{self, ExecOutcome};
use crate::spec::StepSpec;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sinew_core::{Inputs, SinewError};

/// String rendering of the agreement field, used to partition outputs.
/// Outputs without the field fall back to their whole rendering.
fn agreement_key(raw: &Value, field: &str) -> String {
    match raw.get(field) {
        Some(value) => value.to_string(),
        None => raw.to_string(),
    }
}

pub(crate) async fn execute_quorum<T: DeserializeOwned + Serialize>(
    spec: &StepSpec<T>,
    inputs: &Inputs,
    extra_context: &[String],
) -> Result<T, SinewError> {
    let Some((n, threshold)) = spec.quorum else {
        // Not a quorum step; run the plain state machine.
        return executor::execute_once(spec, inputs, extra_context)
            .await
            .map(|outcome| outcome.value);
    };
    let field = spec.agree_on.as_deref().unwrap_or_default();

    let runs = (0..n).map(|_| executor::execute_once(spec, inputs, extra_context));
    let mut successes: Vec<ExecOutcome<T>> = Vec::new();
    let mut failures: Vec<SinewError> = Vec::new();
    for result in join_all(runs).await {
        match result {
            Ok(outcome) => successes.push(outcome),
            Err(err) => failures.push(err),
        }
    }

    // Fewer than K successes cannot reach the threshold; the first failure
    // is the cause.
    if successes.len() < threshold {
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }
        return Err(SinewError::Consensus {
            step: spec.name.clone(),
            quorum: n,
            threshold,
            outputs: successes.iter().map(|o| o.raw.clone()).collect(),
        });
    }

    // Partition successes by the rendering of their agreement field.
    let keys: Vec<String> = successes
        .iter()
        .map(|outcome| agreement_key(&outcome.raw, field))
        .collect();
    let mut modal_key: &str = &keys[0];
    let mut modal_count = 0usize;
    for key in &keys {
        let count = keys.iter().filter(|other| *other == key).count();
        if count > modal_count {
            modal_count = count;
            modal_key = key;
        }
    }

    if modal_count < threshold {
        return Err(SinewError::Consensus {
            step: spec.name.clone(),
            quorum: n,
            threshold,
            outputs: successes.iter().map(|o| o.raw.clone()).collect(),
        });
    }

    // Within the agreeing partition, prefer the output with the highest
    // `confidence` field; shapes without one take the first agreer.
    let mut first_idx: Option<usize> = None;
    let mut best_idx: Option<usize> = None;
    let mut best_confidence = f64::NEG_INFINITY;
    for (i, key) in keys.iter().enumerate() {
        if key != modal_key {
            continue;
        }
        if first_idx.is_none() {
            first_idx = Some(i);
        }
        if let Some(confidence) = successes[i].raw.get("confidence").and_then(|v| v.as_f64()) {
            if confidence > best_confidence {
                best_confidence = confidence;
                best_idx = Some(i);
            }
        }
    }
    let chosen = best_idx.or(first_idx).unwrap_or(0);
    Ok(successes.swap_remove(chosen).value)
}
