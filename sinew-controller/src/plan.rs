//! Plan documents: parse, structural validation, semantic validation.
//!
//! A plan is a YAML document declaring contracts (named field sets),
//! functions (infer or compute, with intent, ensure expressions, budgets),
//! and flows (a DAG of steps wired together with `$` references).

use crate::error::PlanError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Plan document versions this controller understands.
const KNOWN_VERSIONS: &[&str] = &["0.1"];

/// One field of a contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Field type name ("string", "number", "integer", "boolean", …).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Closed literal set, for enum-like fields.
    #[serde(default)]
    pub values: Option<Vec<Value>>,
}

/// A named output contract: field name → spec.
pub type ContractDef = BTreeMap<String, FieldSpec>;

/// Whether a function is model-backed or deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// LLM-backed.
    Infer,
    /// Deterministic; never routed to a model.
    Compute,
}

impl Mode {
    /// Wire rendering of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Infer => "infer",
            Mode::Compute => "compute",
        }
    }
}

/// Declared time/cost ceilings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetDef {
    /// Wall-clock ceiling in milliseconds.
    #[serde(default)]
    pub ms: Option<u64>,
    /// Cost ceiling in USD.
    #[serde(default)]
    pub usd: Option<f64>,
}

fn default_retries() -> u32 {
    3
}

/// A declared function.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDef {
    /// Execution mode.
    pub mode: Mode,
    /// Natural-language intent.
    pub intent: String,
    /// Input parameter declarations (name → type description).
    #[serde(default, rename = "input")]
    pub input_schema: BTreeMap<String, Value>,
    /// Name of the output contract.
    #[serde(rename = "output")]
    pub output_contract: String,
    /// Ensure expressions checked against every result.
    #[serde(default)]
    pub ensure: Vec<String>,
    /// Optional budget.
    #[serde(default)]
    pub budget: Option<BudgetDef>,
    /// Total attempts allowed per step execution.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// One step of a flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
    /// Step identifier, unique within the flow.
    pub id: String,
    /// Name of the function this step runs.
    pub function: String,
    /// Parameter name → `$` reference or literal.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Explicit dependency edges.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional JSON Schema the result must satisfy, checked before
    /// ensure expressions.
    #[serde(default)]
    pub output_schema: Option<Value>,
}

/// A declared flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDef {
    /// Flow-level input declarations.
    #[serde(default, rename = "input")]
    pub input_schema: BTreeMap<String, Value>,
    /// Name of the flow's output contract.
    #[serde(rename = "output")]
    pub output_contract: String,
    /// Optional flow budget.
    #[serde(default)]
    pub budget: Option<BudgetDef>,
    /// Ordered DAG of steps.
    pub steps: Vec<StepDef>,
}

/// A parsed, validated plan document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDoc {
    /// Document version; only "0.1" today.
    pub version: String,
    /// Declared contracts.
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractDef>,
    /// Declared functions.
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDef>,
    /// Declared flows.
    #[serde(default)]
    pub flows: BTreeMap<String, FlowDef>,
}

/// Parse YAML → structural checks → semantic checks → [`PlanDoc`].
pub fn parse_and_validate(raw: &str) -> Result<PlanDoc, PlanError> {
    if raw.trim().is_empty() {
        return Err(PlanError::Parse("empty or blank plan input".into()));
    }

    // Structural validation rides on the typed deserialization: unknown
    // fields, wrong shapes, and missing required keys all surface here
    // with the document location serde_yaml reports.
    let doc: PlanDoc = serde_yaml::from_str(raw).map_err(|err| match err.location() {
        Some(loc) => PlanError::validation(
            format!("line {}, column {}", loc.line(), loc.column()),
            err.to_string(),
            "check the element against the plan structure",
        ),
        None => PlanError::Parse(err.to_string()),
    })?;

    if !KNOWN_VERSIONS.contains(&doc.version.as_str()) {
        return Err(PlanError::validation(
            "version",
            format!("unknown plan version: {:?}", doc.version),
            format!("use version: \"{}\"", KNOWN_VERSIONS[KNOWN_VERSIONS.len() - 1]),
        ));
    }

    validate_semantics(&doc)?;
    Ok(doc)
}

fn validate_semantics(doc: &PlanDoc) -> Result<(), PlanError> {
    for (fn_name, function) in &doc.functions {
        if !doc.contracts.contains_key(&function.output_contract) {
            return Err(PlanError::semantic(
                format!("functions.{fn_name}.output"),
                format!(
                    "function '{fn_name}' output contract '{}' not defined",
                    function.output_contract
                ),
            ));
        }
        if function.retries == 0 {
            return Err(PlanError::semantic(
                format!("functions.{fn_name}.retries"),
                format!("function '{fn_name}' must allow at least one attempt"),
            ));
        }
    }

    for (flow_name, flow) in &doc.flows {
        if !doc.contracts.contains_key(&flow.output_contract) {
            return Err(PlanError::semantic(
                format!("flows.{flow_name}.output"),
                format!(
                    "flow '{flow_name}' output contract '{}' not defined",
                    flow.output_contract
                ),
            ));
        }
        if flow.steps.is_empty() {
            return Err(PlanError::validation(
                format!("flows.{flow_name}.steps"),
                format!("flow '{flow_name}' declares no steps"),
                "a flow needs at least one step",
            ));
        }

        // Collect ids up front so depends_on may reference steps in any
        // declaration order; cycles are caught by the topological sort.
        let known_ids: Vec<&str> = flow.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &flow.steps {
            if !doc.functions.contains_key(&step.function) {
                return Err(PlanError::semantic(
                    format!("flows.{flow_name}.steps.{}.function", step.id),
                    format!(
                        "step '{}' references undefined function '{}'",
                        step.id, step.function
                    ),
                ));
            }
            for dep in &step.depends_on {
                if !known_ids.contains(&dep.as_str()) {
                    return Err(PlanError::semantic(
                        format!("flows.{flow_name}.steps.{}.depends_on", step.id),
                        format!("step '{}' depends_on unknown step '{dep}'", step.id),
                    ));
                }
            }
        }
    }
    Ok(())
}
