//! # sinew-core — Protocol types for the sinew runtime
//!
//! sinew composes LLM-backed steps into deterministic flows with strong
//! contracts. This crate defines the boundaries everything else builds on:
//!
//! | Boundary | Types | What it does |
//! |----------|-------|--------------|
//! | Provider | [`Provider`], [`ProviderRequest`], [`ProviderResponse`] | How a model is called |
//! | Budget | [`Budget`] | Wall-clock and cost ceilings for an invocation |
//! | Trace | [`TraceRecord`], [`Tracer`] | What happened, and the export hook |
//! | Review | [`ReviewSink`], [`PendingReview`], [`HumanDecision`] | Human-in-the-loop suspension |
//! | Config | [`config`] | Process-wide late-bound wiring |
//!
//! ## Design Principle
//!
//! The runtime never talks to a model vendor directly. [`Provider`] is the
//! single seam: it takes one request carrying a compiled prompt and a forced
//! tool descriptor, and returns tool calls plus usage. Anything a provider
//! does wrong — network, protocol, shape — is one failure class to the
//! executor.
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for model outputs, input
//! bindings, and attachments. JSON is the interchange format of every
//! structured-output API this runtime fronts; a generic `T: Serialize` at
//! this boundary would complicate trait-object safety without benefit.
//! Costs are `rust_decimal::Decimal` — budget arithmetic must not drift.

#![deny(missing_docs)]

pub mod bindings;
pub mod budget;
pub mod config;
pub mod error;
pub mod id;
pub mod probabilistic;
pub mod provider;
pub mod review;
pub mod trace;

pub use bindings::Inputs;
pub use budget::Budget;
pub use error::SinewError;
pub use id::{FlowId, ReviewId};
pub use probabilistic::Probabilistic;
pub use provider::{
    CacheHint, MessageBlock, Provider, ProviderError, ProviderRequest, ProviderResponse,
    TokenUsage, ToolCall, ToolDescriptor,
};
pub use review::{DecisionKind, HumanDecision, PendingReview, ReviewContext, ReviewSink};
pub use trace::{TraceAttributes, TraceRecord, Tracer};
