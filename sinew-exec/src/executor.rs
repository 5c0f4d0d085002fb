//! The per-step execution state machine.
//!
//! `execute_once` runs one full invocation: precheck → lookup → compile →
//! call → parse → postcheck, retrying compile-through-postcheck up to the
//! step's retry ceiling with accumulated failure feedback injected into
//! each recompiled prompt. Terminal outcomes append exactly one trace
//! record; precondition failures and cache-revalidation failures fail fast
//! without touching the trace log.

use crate::cache;
use crate::spec::{CachePolicy, Postcondition, StepSpec};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sinew_core::config::{self, Config};
use sinew_core::trace::{self, TraceAttributes, TraceRecord, derive_system};
use sinew_core::{
    Budget, FlowId, Inputs, ProviderRequest, SinewError, TokenUsage, ToolDescriptor,
};
use sinew_prompt::{CompiledPrompt, PromptSpec};
use std::time::Instant;

/// One successful execution: the typed value plus its raw JSON form, which
/// quorum partitioning and debate convergence read fields from.
pub(crate) struct ExecOutcome<T> {
    pub(crate) value: T,
    pub(crate) raw: Value,
}

/// Run every postcondition in declaration order, collecting violations.
fn run_postconditions<T>(ensure: &[Postcondition<T>], value: &T) -> Vec<String> {
    ensure
        .iter()
        .filter(|post| !(post.check)(value))
        .map(|post| format!("ensure: {}(result) was false", post.label))
        .collect()
}

/// Append the record to the trace store and hand the flat attributes to the
/// configured export hook.
fn emit_terminal(cfg: &Config, record: TraceRecord, usage: Option<&TokenUsage>) {
    let attrs = TraceAttributes {
        system: derive_system(&record.model),
        model: record.model.clone(),
        step: record.step.clone(),
        contract_hash: record.contract_hash.clone(),
        attempts: record.attempts,
        cost_usd: record.cost_usd,
        cache_hit: record.cache_hit,
        flow_id: record.flow_id.clone(),
        duration_ms: record.duration_ms,
        input_tokens: usage.map(|u| u.input_tokens),
        output_tokens: usage.map(|u| u.output_tokens),
    };
    trace::record(record);
    if let Some(tracer) = &cfg.tracer {
        tracer.emit(attrs);
    }
}

#[allow(clippy::too_many_arguments)]
fn make_record(
    spec_name: &str,
    model: &str,
    inputs: &Inputs,
    prompt_hash: &str,
    contract_hash: &str,
    attempts: u32,
    output: Option<Value>,
    duration_ms: u64,
    cost_usd: Option<Decimal>,
    cache_hit: bool,
    retry_reasons: Vec<String>,
    flow_id: Option<FlowId>,
) -> TraceRecord {
    TraceRecord {
        step: spec_name.to_string(),
        model: model.to_string(),
        inputs: inputs.to_object(),
        compiled_prompt_hash: prompt_hash.to_string(),
        contract_hash: contract_hash.to_string(),
        attempts,
        output,
        duration_ms,
        cost_usd,
        cache_hit,
        retry_reasons,
        flow_id,
        review_id: None,
    }
}

pub(crate) async fn execute_once<T: DeserializeOwned + Serialize>(
    spec: &StepSpec<T>,
    inputs: &Inputs,
    extra_context: &[String],
) -> Result<ExecOutcome<T>, SinewError> {
    let cfg = config::current();
    let flow = sinew_flow::current();
    let flow_id = flow.as_ref().map(|c| c.flow_id().clone());
    let flow_budget = flow.as_ref().and_then(|c| c.budget().cloned());

    // 1. precheck: before cache, before provider, mutating nothing.
    for pre in &spec.require {
        if !(pre.check)(inputs) {
            return Err(SinewError::Precondition {
                step: spec.name.clone(),
                condition: pre.label.clone(),
            });
        }
    }

    let model = spec
        .model
        .clone()
        .unwrap_or_else(|| cfg.default_model.clone());

    // 2. lookup. Cached values are revalidated against the step's
    // *current* postconditions before being returned.
    let ih = cache::inputs_hash(inputs);
    let cache_key = match spec.cache {
        CachePolicy::None => None,
        CachePolicy::Session => Some(format!("{}:{ih}", spec.name)),
        CachePolicy::Global => Some(format!("{}:{ih}:{}", spec.name, spec.contract_hash)),
    };
    if let Some(key) = &cache_key {
        let cached = match spec.cache {
            CachePolicy::Session => sinew_flow::session_get(key),
            CachePolicy::Global => cache::global_get(key),
            CachePolicy::None => None,
        };
        if let Some(raw) = cached {
            // Entries that no longer deserialize are treated as misses.
            if let Ok(value) = serde_json::from_value::<T>(raw.clone()) {
                let violations = run_postconditions(&spec.ensure, &value);
                if !violations.is_empty() {
                    return Err(SinewError::Postcondition {
                        step: spec.name.clone(),
                        violations: violations.clone(),
                        history: vec![violations],
                    });
                }
                tracing::debug!(step = %spec.name, "cache hit");
                emit_terminal(
                    &cfg,
                    make_record(
                        &spec.name,
                        &model,
                        inputs,
                        "none",
                        &spec.contract_hash,
                        0,
                        Some(raw.clone()),
                        0,
                        None,
                        true,
                        vec![],
                        flow_id,
                    ),
                    None,
                );
                return Ok(ExecOutcome { value, raw });
            }
        }
    }

    let provider = cfg.provider.clone().ok_or_else(|| {
        SinewError::compile(
            format!("step '{}'", spec.name),
            "no provider configured; install one via sinew_core::config::update",
        )
    })?;
    let cacheable = provider.supports_prompt_caching();

    let full_context: Vec<String> = spec
        .context
        .iter()
        .chain(extra_context.iter())
        .cloned()
        .collect();

    // Effective budget: a declared step budget is restarted per invocation
    // and overrides the flow budget; otherwise the flow's shared envelope
    // applies directly. When both exist, the flow envelope still caps the
    // timeout and receives cost accruals, so flow ceilings hold across the
    // call tree.
    let effective: Option<Budget> = match &spec.budget {
        Some(declared) => Some(declared.fresh()),
        None => flow_budget.clone(),
    };
    let ambient: Option<Budget> = if spec.budget.is_some() {
        flow_budget
    } else {
        None
    };

    let start = Instant::now();
    let mut attempts_made: u32 = 0;
    let mut retry_reasons: Vec<String> = Vec::new();
    let mut all_reasons: Vec<String> = Vec::new();
    let mut history: Vec<Vec<String>> = Vec::new();
    let mut total_cost: Option<Decimal> = None;
    let mut last_usage: Option<TokenUsage> = None;
    let mut last_prompt_hash = String::from("none");
    let mut last_raw_text = String::new();
    let mut last_failure_was_parse = true;

    for _ in 0..=spec.retries {
        // a. budget entry checks: exhausted cost or clock fails the
        // invocation before another provider call is made.
        for envelope in [effective.as_ref(), ambient.as_ref()].into_iter().flatten() {
            if envelope.is_cost_exceeded() || envelope.is_time_exhausted() {
                emit_terminal(
                    &cfg,
                    make_record(
                        &spec.name,
                        &model,
                        inputs,
                        &last_prompt_hash,
                        &spec.contract_hash,
                        attempts_made,
                        None,
                        start.elapsed().as_millis() as u64,
                        total_cost,
                        false,
                        all_reasons.clone(),
                        flow_id.clone(),
                    ),
                    last_usage.as_ref(),
                );
                return Err(SinewError::Budget {
                    step: spec.name.clone(),
                    budget: envelope.clone(),
                });
            }
        }

        // b. compile. Retry feedback from prior attempts rides along.
        let prompt = sinew_prompt::compile(&PromptSpec {
            intent: &spec.intent,
            context: &full_context,
            inputs,
            opaque_fields: &spec.opaque_params,
            retry_reasons: &retry_reasons,
        })?;
        last_prompt_hash = prompt.hash();

        let request = ProviderRequest {
            model: model.clone(),
            system: vec![CompiledPrompt::system_block(cacheable)],
            user: prompt.user_blocks(cacheable),
            tool: ToolDescriptor {
                name: "output".into(),
                description: "Return the structured output".into(),
                parameters: spec.tool_schema.clone(),
            },
            force_tool: true,
            temperature: spec.temperature,
        };

        // c. call, under the minimum remaining time across envelopes.
        let timeout = [effective.as_ref(), ambient.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|envelope| envelope.remaining().map(|left| (left, envelope)))
            .min_by_key(|(left, _)| *left);

        tracing::debug!(step = %spec.name, attempt = attempts_made + 1, "provider call");
        attempts_made += 1;
        let call = provider.complete(request);
        let result = match timeout {
            Some((limit, exhausted)) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    let budget = exhausted.clone();
                    emit_terminal(
                        &cfg,
                        make_record(
                            &spec.name,
                            &model,
                            inputs,
                            &last_prompt_hash,
                            &spec.contract_hash,
                            attempts_made,
                            None,
                            start.elapsed().as_millis() as u64,
                            total_cost,
                            false,
                            all_reasons.clone(),
                            flow_id.clone(),
                        ),
                        last_usage.as_ref(),
                    );
                    return Err(SinewError::Budget {
                        step: spec.name.clone(),
                        budget,
                    });
                }
            },
            None => call.await,
        };

        let response = match result {
            Ok(response) => response,
            Err(provider_err) => {
                // Any provider-surface error is a parse-class failure.
                let reason = format!("Provider call failed: {provider_err}");
                tracing::warn!(step = %spec.name, %reason, "attempt failed");
                retry_reasons = vec![reason.clone()];
                all_reasons.push(reason.clone());
                history.push(vec![reason]);
                last_failure_was_parse = true;
                last_raw_text.clear();
                continue;
            }
        };

        // d. cost accounting, against every live envelope.
        if let Some(cost) = response.cost {
            if let Some(envelope) = &effective {
                envelope.record_cost(cost);
            }
            if let Some(envelope) = &ambient {
                envelope.record_cost(cost);
            }
            total_cost = Some(total_cost.unwrap_or(Decimal::ZERO) + cost);
        }
        last_usage = Some(response.usage.clone());

        // e. parse: extract the forced tool call, parse its arguments,
        // unwrap primitive returns, deserialize into the contract type.
        let Some(tool_call) = response.tool_calls.first() else {
            let reason = "No tool call in response".to_string();
            retry_reasons = vec![reason.clone()];
            all_reasons.push(reason.clone());
            history.push(vec![reason]);
            last_failure_was_parse = true;
            last_raw_text.clear();
            continue;
        };
        last_raw_text = tool_call.arguments.clone();

        let parsed: Value = match serde_json::from_str(&tool_call.arguments) {
            Ok(value) => value,
            Err(err) => {
                let reason = format!("JSON parse error: {err}");
                retry_reasons = vec![reason.clone()];
                all_reasons.push(reason.clone());
                history.push(vec![reason]);
                last_failure_was_parse = true;
                continue;
            }
        };

        let parsed = if spec.wrap_primitive {
            match parsed {
                Value::Object(mut map) if map.contains_key("value") => {
                    map.remove("value").unwrap_or(Value::Null)
                }
                other => other,
            }
        } else {
            parsed
        };

        let value: T = match serde_json::from_value(parsed.clone()) {
            Ok(value) => value,
            Err(err) => {
                let reason = format!("Contract mismatch: {err}");
                retry_reasons = vec![reason.clone()];
                all_reasons.push(reason.clone());
                history.push(vec![reason]);
                last_failure_was_parse = true;
                continue;
            }
        };

        // f. postcheck, in declaration order.
        let violations = run_postconditions(&spec.ensure, &value);
        if violations.is_empty() {
            let duration_ms = start.elapsed().as_millis() as u64;
            if let Some(key) = &cache_key {
                match spec.cache {
                    CachePolicy::Session => sinew_flow::session_put(key.clone(), parsed.clone()),
                    CachePolicy::Global => cache::global_put(key.clone(), parsed.clone()),
                    CachePolicy::None => {}
                }
            }
            emit_terminal(
                &cfg,
                make_record(
                    &spec.name,
                    &model,
                    inputs,
                    &last_prompt_hash,
                    &spec.contract_hash,
                    attempts_made,
                    Some(parsed.clone()),
                    duration_ms,
                    total_cost,
                    false,
                    all_reasons.clone(),
                    flow_id.clone(),
                ),
                last_usage.as_ref(),
            );
            return Ok(ExecOutcome { value, raw: parsed });
        }

        tracing::warn!(step = %spec.name, violations = ?violations, "postconditions failed");
        last_failure_was_parse = false;
        history.push(violations.clone());
        all_reasons.extend(violations.iter().cloned());
        retry_reasons = violations;
    }

    // Retries exhausted. The final attempt's failure stage decides the
    // error class.
    emit_terminal(
        &cfg,
        make_record(
            &spec.name,
            &model,
            inputs,
            &last_prompt_hash,
            &spec.contract_hash,
            attempts_made,
            None,
            start.elapsed().as_millis() as u64,
            total_cost,
            false,
            all_reasons.clone(),
            flow_id,
        ),
        last_usage.as_ref(),
    );

    if last_failure_was_parse && !retry_reasons.is_empty() {
        Err(SinewError::Parse {
            step: spec.name.clone(),
            raw_output: last_raw_text,
            message: retry_reasons.join("; "),
        })
    } else {
        Err(SinewError::Postcondition {
            step: spec.name.clone(),
            violations: retry_reasons,
            history,
        })
    }
}
