//! # sinew — LLM calls that behave like the rest of your code
//!
//! sinew composes model-backed steps into deterministic flows with strong
//! contracts: typed output shapes with stable content hashes, byte-stable
//! prompt compilation, precondition/postcondition checking with
//! feedback-driven retries, time and cost budgets enforced across the
//! call tree, flow-scoped caching, and an append-only trace per
//! invocation.
//!
//! This crate is the facade: each concern lives in its own crate and is
//! re-exported here behind a feature flag.
//!
//! | Feature | Crate | What you get |
//! |---------|-------|--------------|
//! | `core` (default) | sinew-core, -contract, -prompt, -flow, -exec | steps, contracts, flows, budgets, traces |
//! | `orch` | sinew-orch | all/any/at-least/collect, race, debate, refine |
//! | `hitl` | sinew-hitl | `await_human` and review sinks |
//! | `otel` | sinew-otel | OTLP HTTP/JSON trace export |
//! | `controller` | sinew-controller | external-driver flow controller |

#![deny(missing_docs)]

#[cfg(feature = "core")]
pub use sinew_core::{
    Budget, DecisionKind, FlowId, HumanDecision, Inputs, PendingReview, Probabilistic, Provider,
    ProviderError, ProviderRequest, ProviderResponse, ReviewContext, ReviewId, ReviewSink,
    SinewError, TokenUsage, ToolCall, ToolDescriptor, TraceAttributes, TraceRecord, Tracer,
    config,
};

#[cfg(feature = "core")]
pub use sinew_core::trace::{all_records, clear as clear_traces};

#[cfg(feature = "core")]
pub use sinew_contract::{ContractDescriptor, FieldDef, Shape, content_hash, lookup, register};

#[cfg(feature = "core")]
pub use sinew_prompt::{CompiledPrompt, PromptSpec, compile, prompt_hash};

#[cfg(feature = "core")]
pub use sinew_flow::{FlowContext, current as current_flow, scope as flow_scope};

#[cfg(feature = "core")]
pub use sinew_exec::{CachePolicy, Step, StepBuilder};

#[cfg(feature = "orch")]
pub use sinew_orch::{
    DebateTurn, Debater, Outcome, Synthesis, all, all_validated, any, at_least, collect, debate,
    race, refine,
};

#[cfg(feature = "hitl")]
pub use sinew_hitl::{ConsoleReviewSink, TimeoutPolicy, await_human};

#[cfg(feature = "otel")]
pub use sinew_otel::OtlpTracer;

#[cfg(feature = "controller")]
pub use sinew_controller::Controller;
