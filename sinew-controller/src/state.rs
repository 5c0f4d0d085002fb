//! Flow execution state: topological ordering, the step cursor, and
//! result processing.

use crate::error::PlanError;
use crate::expr::compile_ensure;
use crate::plan::{FlowDef, PlanDoc, StepDef};
use crate::refs::{implicit_dependency, resolve_inputs};
use serde::Serialize;
use serde_json::{Map, Value, json};
use sinew_core::FlowId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Validates a step result against a JSON Schema. The controller ships no
/// validator of its own — callers inject one; without it, `output_schema`
/// declarations are inert.
pub trait OutputValidator: Send + Sync {
    /// Violation strings, empty when the result satisfies the schema.
    fn validate(&self, result: &Value, schema: &Value) -> Vec<String>;
}

/// One completed step, as reported in audits and completion responses.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// The step's id.
    pub step_id: String,
    /// The function it ran.
    pub function: String,
    /// Attempts the driver needed.
    pub attempts: u32,
    /// Wall-clock from dispatch to acceptance.
    pub duration_ms: u64,
}

/// Outcome classes of [`FlowState::process_step_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Result accepted; the cursor advanced.
    Ok,
    /// The result failed JSON-schema validation; retries remain.
    SchemaFailed,
    /// The result failed ensure expressions; retries remain.
    EnsureFailed,
    /// The result failed and the function's attempt ceiling is spent.
    RetriesExhausted,
}

impl StepStatus {
    /// Wire rendering of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Ok => "ok",
            StepStatus::SchemaFailed => "schema_failed",
            StepStatus::EnsureFailed => "ensure_failed",
            StepStatus::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Kahn's algorithm over explicit `depends_on` edges plus implicit
/// `$.steps.<id>.output` references. Cycles fail up front.
fn topological_sort(flow: &FlowDef) -> Result<Vec<StepDef>, PlanError> {
    let mut dependencies: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for step in &flow.steps {
        let deps = dependencies.entry(step.id.as_str()).or_default();
        for dep in &step.depends_on {
            deps.push(dep.as_str());
        }
        for reference in step.inputs.values() {
            if let Some(dep) = implicit_dependency(reference) {
                // The id may reference a step outside this flow's id set;
                // semantic validation only covers explicit edges. Unknown
                // implicit targets surface at resolution time instead.
                if flow.steps.iter().any(|s| s.id == dep) {
                    deps.push(dep);
                }
            }
        }
        deps.sort_unstable();
        deps.dedup();
    }

    let mut in_degree: BTreeMap<&str, usize> =
        dependencies.iter().map(|(id, deps)| (*id, deps.len())).collect();
    let mut ready: Vec<&str> = flow
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
        .collect();
    let mut ordered_ids: Vec<&str> = Vec::with_capacity(flow.steps.len());

    while let Some(id) = ready.first().copied() {
        ready.remove(0);
        ordered_ids.push(id);
        for (&other, deps) in &dependencies {
            if deps.contains(&id) {
                let degree = in_degree.entry(other).or_default();
                *degree = degree.saturating_sub(1);
                if *degree == 0 && !ordered_ids.contains(&other) && !ready.contains(&other) {
                    ready.push(other);
                }
            }
        }
    }

    if ordered_ids.len() != flow.steps.len() {
        let remaining: Vec<&str> = flow
            .steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !ordered_ids.contains(id))
            .collect();
        return Err(PlanError::Execution(format!(
            "cycle detected in step dependencies: {remaining:?}"
        )));
    }

    Ok(ordered_ids
        .into_iter()
        .filter_map(|id| flow.steps.iter().find(|s| s.id == id).cloned())
        .collect())
}

/// Mutable execution state of one flow run.
#[derive(Debug)]
pub struct FlowState {
    flow_id: FlowId,
    flow_name: String,
    plan: Arc<PlanDoc>,
    ordered: Vec<StepDef>,
    inputs: Map<String, Value>,
    step_outputs: BTreeMap<String, Value>,
    records: Vec<StepRecord>,
    attempts: BTreeMap<String, u32>,
    dispatched_at: BTreeMap<String, Instant>,
    started: Instant,
    cursor: usize,
}

impl FlowState {
    /// Create execution state for one named flow of a validated plan.
    pub fn new(
        plan: Arc<PlanDoc>,
        flow_name: &str,
        inputs: Map<String, Value>,
    ) -> Result<Self, PlanError> {
        let flow = plan
            .flows
            .get(flow_name)
            .ok_or_else(|| PlanError::Execution(format!("flow '{flow_name}' not found in plan")))?;
        let ordered = topological_sort(flow)?;
        Ok(Self {
            flow_id: FlowId::random(),
            flow_name: flow_name.to_string(),
            plan,
            ordered,
            inputs,
            step_outputs: BTreeMap::new(),
            records: Vec::new(),
            attempts: BTreeMap::new(),
            dispatched_at: BTreeMap::new(),
            started: Instant::now(),
            cursor: 0,
        })
    }

    /// The flow run's identifier.
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// Whether every step has been accepted.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.ordered.len()
    }

    /// The current step as a descriptor the external driver acts on, with
    /// inputs resolved against earlier outputs. Records dispatch time for
    /// duration tracking. `None` when the flow is complete.
    pub fn current_step_descriptor(&mut self) -> Result<Option<Value>, PlanError> {
        let Some(step) = self.ordered.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let plan = Arc::clone(&self.plan);
        let function = plan
            .functions
            .get(&step.function)
            .ok_or_else(|| PlanError::Execution(format!("function '{}' vanished", step.function)))?;

        let resolved = resolve_inputs(&step.inputs, &self.inputs, &self.step_outputs)?;
        self.dispatched_at.insert(step.id.clone(), Instant::now());
        let attempts_so_far = self.attempts.get(&step.id).copied().unwrap_or(0);

        let output_fields: Map<String, Value> = plan
            .contracts
            .get(&function.output_contract)
            .map(|contract| {
                contract
                    .iter()
                    .map(|(name, field)| (name.clone(), json!(field.type_name)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(json!({
            "status": "execute_step",
            "flow_id": self.flow_id.as_str(),
            "step_number": self.cursor + 1,
            "total_steps": self.ordered.len(),
            "step_id": step.id,
            "function": step.function,
            "mode": function.mode.as_str(),
            "intent": &function.intent,
            "inputs": resolved,
            "output_contract": &function.output_contract,
            "output_fields": output_fields,
            "ensure": &function.ensure,
            "retries_remaining": function.retries.saturating_sub(attempts_so_far),
        })))
    }

    /// Record a completed step result.
    ///
    /// Schema validation (when a validator is injected and the step
    /// declares `output_schema`) runs before ensure expressions, so
    /// structural errors surface first. Failures leave the cursor in
    /// place — the driver retries the same step — until the function's
    /// attempt ceiling is spent.
    pub fn process_step_result(
        &mut self,
        step_id: &str,
        result: Value,
        validator: Option<&dyn OutputValidator>,
    ) -> Result<(StepStatus, Vec<String>), PlanError> {
        let Some(step) = self.ordered.get(self.cursor).cloned() else {
            return Err(PlanError::Execution("flow is already complete".into()));
        };
        if step.id != step_id {
            return Err(PlanError::Execution(format!(
                "expected step '{}', got '{step_id}'",
                step.id
            )));
        }
        let function = self
            .plan
            .functions
            .get(&step.function)
            .ok_or_else(|| PlanError::Execution(format!("function '{}' vanished", step.function)))?
            .clone();

        let attempt = self.attempts.entry(step_id.to_string()).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        if let (Some(schema), Some(validator)) = (&step.output_schema, validator) {
            let violations = validator.validate(&result, schema);
            if !violations.is_empty() {
                if attempt >= function.retries {
                    self.finish_step(&step, attempt);
                    return Ok((StepStatus::RetriesExhausted, violations));
                }
                return Ok((StepStatus::SchemaFailed, violations));
            }
        }

        let mut violations: Vec<String> = Vec::new();
        for source in &function.ensure {
            match compile_ensure(source) {
                Ok(compiled) => match compiled.eval(&result) {
                    Ok(true) => {}
                    Ok(false) => violations.push(format!("ensure '{source}' failed")),
                    Err(err) => violations.push(format!("ensure '{source}' raised: {err}")),
                },
                Err(err) => violations.push(err.to_string()),
            }
        }

        if !violations.is_empty() {
            if attempt >= function.retries {
                self.finish_step(&step, attempt);
                return Ok((StepStatus::RetriesExhausted, violations));
            }
            return Ok((StepStatus::EnsureFailed, violations));
        }

        self.step_outputs.insert(step_id.to_string(), result);
        self.finish_step(&step, attempt);
        self.cursor += 1;
        Ok((StepStatus::Ok, vec![]))
    }

    fn finish_step(&mut self, step: &StepDef, attempts: u32) {
        let dispatched = self
            .dispatched_at
            .get(&step.id)
            .copied()
            .unwrap_or(self.started);
        self.records.push(StepRecord {
            step_id: step.id.clone(),
            function: step.function.clone(),
            attempts,
            duration_ms: dispatched.elapsed().as_millis() as u64,
        });
    }

    /// The final step's accepted output, once complete.
    pub fn final_output(&self) -> Option<&Value> {
        self.ordered
            .last()
            .and_then(|step| self.step_outputs.get(&step.id))
    }

    /// Audit snapshot: progress, per-step records, total duration.
    pub fn audit(&self) -> Value {
        json!({
            "flow_id": self.flow_id.as_str(),
            "flow_name": &self.flow_name,
            "status": if self.is_complete() { "complete" } else { "in_progress" },
            "steps_completed": self.records.len(),
            "total_steps": self.ordered.len(),
            "trace": &self.records,
            "total_duration_ms": self.started.elapsed().as_millis() as u64,
        })
    }

    /// Total wall-clock since the flow was planned.
    pub fn total_duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Completed step records.
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }
}
