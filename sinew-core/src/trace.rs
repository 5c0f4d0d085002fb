//! In-memory trace log and the export hook.
//!
//! Every terminal step outcome appends exactly one [`TraceRecord`] to a
//! process-wide, append-only store. Retries never produce separate records.
//! Reads are snapshot copies. A configured [`Tracer`] additionally receives
//! the flat [`TraceAttributes`] of every terminal write — that hook is the
//! only path out of the process; the store itself never persists.

use crate::id::{FlowId, ReviewId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, OnceLock};

/// Immutable record produced by every step invocation that reaches a
/// terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Qualified step name.
    pub step: String,
    /// Model the step ran against.
    pub model: String,
    /// All input bindings, opaque fields included.
    pub inputs: serde_json::Value,
    /// 12-hex SHA-256 of the final attempt's compiled prompt ("none" for
    /// cache hits, which compile nothing).
    pub compiled_prompt_hash: String,
    /// 12-hex SHA-256 of the contract schema.
    pub contract_hash: String,
    /// Provider calls actually made (0 for a cache hit).
    pub attempts: u32,
    /// Final typed output; None when the invocation failed.
    pub output: Option<serde_json::Value>,
    /// Wall-clock duration of the invocation.
    pub duration_ms: u64,
    /// Accumulated cost, when the adapter reported any.
    pub cost_usd: Option<Decimal>,
    /// Whether the result came from cache.
    pub cache_hit: bool,
    /// Violation messages accumulated across all failed attempts, in order.
    pub retry_reasons: Vec<String>,
    /// Ambient flow, when the step ran inside one.
    pub flow_id: Option<FlowId>,
    /// Set when a human review participated in this step.
    pub review_id: Option<ReviewId>,
}

fn store() -> &'static Mutex<Vec<TraceRecord>> {
    static STORE: OnceLock<Mutex<Vec<TraceRecord>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(Vec::new()))
}

/// Append a trace record to the in-memory store.
pub fn record(trace: TraceRecord) {
    store().lock().expect("trace store lock").push(trace);
}

/// Snapshot of all trace records so far.
pub fn all_records() -> Vec<TraceRecord> {
    store().lock().expect("trace store lock").clone()
}

/// Clear all in-memory trace records. Intended for test isolation.
pub fn clear() {
    store().lock().expect("trace store lock").clear();
}

/// Flat attribute set handed to the configured [`Tracer`] at every terminal
/// trace write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceAttributes {
    /// Provider system derived from the model id ("anthropic", "openai", …).
    pub system: String,
    /// Model id the step ran against.
    pub model: String,
    /// Qualified step name.
    pub step: String,
    /// Contract content hash.
    pub contract_hash: String,
    /// Provider calls made.
    pub attempts: u32,
    /// Accumulated cost, if reported.
    pub cost_usd: Option<Decimal>,
    /// Whether the result came from cache.
    pub cache_hit: bool,
    /// Ambient flow id, when present.
    pub flow_id: Option<FlowId>,
    /// Invocation duration.
    pub duration_ms: u64,
    /// Input tokens, when the adapter reported usage.
    pub input_tokens: Option<u64>,
    /// Output tokens, when the adapter reported usage.
    pub output_tokens: Option<u64>,
}

/// Export hook invoked at every terminal trace write.
///
/// `emit` must not block and must not fail the caller: exporters run their
/// I/O on background tasks and swallow their own errors.
pub trait Tracer: Send + Sync {
    /// Receive one terminal outcome's attributes.
    fn emit(&self, attrs: TraceAttributes);
}

/// Derive the provider system name from a model id.
///
/// Mirrors the conventions of Gen-AI telemetry: `claude-*` → anthropic,
/// `gemini-*` → google, `gpt-*`/o-series → openai, otherwise the model's
/// namespace prefix when it has one.
pub fn derive_system(model: &str) -> String {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        return "anthropic".into();
    }
    if lower.contains("gemini") {
        return "google".into();
    }
    // Strip a "vendor/model" prefix before matching OpenAI model names.
    let bare = lower.rsplit('/').next().unwrap_or(&lower);
    if bare.starts_with("gpt-")
        || bare.starts_with("o1")
        || bare.starts_with("o3")
        || bare.starts_with("o4")
    {
        return "openai".into();
    }
    match lower.split_once('/') {
        Some((vendor, _)) => vendor.to_string(),
        None => "unknown".into(),
    }
}
