//! Human-review value types and the sink boundary.
//!
//! A suspended step hands a [`PendingReview`] to the configured
//! [`ReviewSink`]. The sink presents it on its channel (terminal, chat,
//! webhook) and calls [`PendingReview::resolve`] exactly once when the
//! reviewer decides. Resolution type-checks the decided value against the
//! review's expected [`DecisionKind`] and hands mismatches back to the sink
//! as descriptive errors, so interactive sinks can re-prompt.

use crate::id::ReviewId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;

/// Describes a review request to the human channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewContext {
    /// The question put to the reviewer.
    pub question: String,
    /// What triggered the review ("explicit", "debate_disagreement", …).
    pub trigger: String,
    /// Arbitrary artifacts to display alongside the question.
    pub artifacts: serde_json::Value,
}

impl ReviewContext {
    /// An explicit review with the given question and no artifacts.
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            trigger: "explicit".into(),
            artifacts: serde_json::Value::Null,
        }
    }

    /// Override the trigger label.
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }

    /// Attach artifacts for display.
    pub fn with_artifacts(mut self, artifacts: serde_json::Value) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// The JSON kind a decision value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// A string decision.
    String,
    /// An integer decision.
    Integer,
    /// Any numeric decision.
    Number,
    /// A boolean decision.
    Boolean,
    /// A structured object decision.
    Object,
}

impl DecisionKind {
    /// Whether `value` has this kind.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A typed human decision with provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    /// The decided value.
    pub value: serde_json::Value,
    /// Identity of the reviewer, if provided.
    pub reviewer: Option<String>,
    /// Optional human note.
    pub rationale: Option<String>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
    /// The review this decision resolves; correlates with trace records.
    pub review_id: ReviewId,
}

impl HumanDecision {
    /// A bare decision for the given review, timestamped now.
    pub fn new(review_id: ReviewId, value: serde_json::Value) -> Self {
        Self {
            value,
            reviewer: None,
            rationale: None,
            decided_at: Utc::now(),
            review_id,
        }
    }

    /// Deserialize the decided value into a concrete type.
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// Why a resolution attempt was rejected. Reported back to the sink, which
/// may re-prompt the reviewer.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The decided value does not have the expected kind.
    #[error("expected a {expected} decision, got {got}")]
    KindMismatch {
        /// Kind the review expects.
        expected: &'static str,
        /// Kind the sink delivered.
        got: &'static str,
    },

    /// The review was already resolved.
    #[error("review already resolved")]
    AlreadyResolved,
}

type DecisionSlot = Arc<Mutex<Option<oneshot::Sender<HumanDecision>>>>;

/// An in-flight review request.
///
/// Cloning shares the completion slot: the runtime keeps one clone to await
/// on and hands another to the sink. The first successful
/// [`resolve`](Self::resolve) wins.
#[derive(Debug, Clone)]
pub struct PendingReview {
    review_id: ReviewId,
    context: ReviewContext,
    options: Option<Vec<serde_json::Value>>,
    expires_at: Option<DateTime<Utc>>,
    decision_kind: DecisionKind,
    slot: DecisionSlot,
}

impl PendingReview {
    /// Create a review and the receiver its awaiter suspends on.
    pub fn new(
        context: ReviewContext,
        decision_kind: DecisionKind,
        options: Option<Vec<serde_json::Value>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> (Self, oneshot::Receiver<HumanDecision>) {
        let (tx, rx) = oneshot::channel();
        let review = Self {
            review_id: ReviewId::random(),
            context,
            options,
            expires_at,
            decision_kind,
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (review, rx)
    }

    /// The review's stable identifier.
    pub fn review_id(&self) -> &ReviewId {
        &self.review_id
    }

    /// The question and artifacts to present.
    pub fn context(&self) -> &ReviewContext {
        &self.context
    }

    /// Choices to present, when the caller constrained them.
    pub fn options(&self) -> Option<&[serde_json::Value]> {
        self.options.as_deref()
    }

    /// When the review window closes, if a timeout was requested.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// The kind the decided value must have.
    pub fn decision_kind(&self) -> DecisionKind {
        self.decision_kind
    }

    /// Validate the decision's kind, then fulfil the pending awaiter.
    ///
    /// A decision whose value kind mismatches is rejected without consuming
    /// the slot — the sink may correct and retry. Resolving after the
    /// awaiter gave up (timeout) succeeds silently; the decision is dropped.
    pub fn resolve(&self, decision: HumanDecision) -> Result<(), ResolveError> {
        if !self.decision_kind.matches(&decision.value) {
            return Err(ResolveError::KindMismatch {
                expected: self.decision_kind.name(),
                got: kind_of(&decision.value),
            });
        }
        let sender = self
            .slot
            .lock()
            .expect("review slot lock")
            .take()
            .ok_or(ResolveError::AlreadyResolved)?;
        // A dropped receiver means the awaiter timed out; nothing to deliver.
        let _ = sender.send(decision);
        Ok(())
    }
}

/// The external channel that presents a review and resolves it.
///
/// `emit` must be non-blocking: sinks that need user input dispatch
/// collection to a background task and return immediately, so the
/// runtime's timeout can race the reviewer.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    /// Present the review to this sink's channel.
    async fn emit(&self, review: PendingReview);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_to_awaiter() {
        let (review, rx) = PendingReview::new(
            ReviewContext::question("ship it?"),
            DecisionKind::String,
            None,
            None,
        );
        let decision = HumanDecision::new(review.review_id().clone(), json!("approve"));
        review.resolve(decision).unwrap();

        let received = rx.await.unwrap();
        assert_eq!(received.value, json!("approve"));
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected_and_slot_survives() {
        let (review, rx) = PendingReview::new(
            ReviewContext::question("how many?"),
            DecisionKind::Integer,
            None,
            None,
        );

        let bad = HumanDecision::new(review.review_id().clone(), json!("three"));
        let err = review.resolve(bad).unwrap_err();
        assert_eq!(err.to_string(), "expected a integer decision, got string");

        // The slot is intact; a corrected decision still lands.
        let good = HumanDecision::new(review.review_id().clone(), json!(3));
        review.resolve(good).unwrap();
        assert_eq!(rx.await.unwrap().value, json!(3));
    }

    #[tokio::test]
    async fn second_resolve_reports_already_resolved() {
        let (review, _rx) = PendingReview::new(
            ReviewContext::question("ship it?"),
            DecisionKind::Boolean,
            None,
            None,
        );
        review
            .resolve(HumanDecision::new(review.review_id().clone(), json!(true)))
            .unwrap();
        let err = review
            .resolve(HumanDecision::new(review.review_id().clone(), json!(false)))
            .unwrap_err();
        assert!(matches!(err, ResolveError::AlreadyResolved));
    }

    #[test]
    fn decision_kind_matching() {
        assert!(DecisionKind::String.matches(&json!("x")));
        assert!(DecisionKind::Integer.matches(&json!(3)));
        assert!(!DecisionKind::Integer.matches(&json!(3.5)));
        assert!(DecisionKind::Number.matches(&json!(3.5)));
        assert!(DecisionKind::Object.matches(&json!({"a": 1})));
        assert!(!DecisionKind::Boolean.matches(&json!("true")));
    }
}
