#![deny(missing_docs)]
//! Human-in-the-loop suspension.
//!
//! [`await_human`] parks the calling flow on a [`PendingReview`] until the
//! configured [`ReviewSink`] resolves it with a typed decision, or the
//! review window elapses. Resolution type-checks the decided value; sinks
//! get mismatches back as descriptive errors and may re-prompt.
//!
//! ```no_run
//! use sinew_core::{DecisionKind, ReviewContext};
//! use sinew_hitl::{TimeoutPolicy, await_human};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), sinew_core::SinewError> {
//! let decision = await_human(
//!     ReviewContext::question("Ship the migration?"),
//!     DecisionKind::String,
//!     Some(vec![json!("approve"), json!("reject")]),
//!     Some(Duration::from_secs(3600)),
//!     TimeoutPolicy::Fallback(json!("reject")),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod console;

pub use console::ConsoleReviewSink;

use chrono::Utc;
use serde_json::Value;
use sinew_core::{DecisionKind, HumanDecision, PendingReview, ReviewContext, SinewError, config};
use std::sync::Arc;
use std::time::Duration;

/// What happens when the review window elapses unresolved.
#[derive(Debug, Clone)]
pub enum TimeoutPolicy {
    /// Fail with [`SinewError::HitlTimeout`].
    Raise,
    /// Synthesise a decision with this value, reviewer `"auto"`, and
    /// rationale `"timeout"`.
    Fallback(Value),
}

/// Suspend until a human resolves the review, or the window elapses.
///
/// The review is handed to the configured sink's `emit`, which must not
/// block: interactive sinks dispatch collection to a background task so the
/// timeout can race the reviewer. The timeout is wall-clock and is not
/// drawn from any budget envelope.
pub async fn await_human(
    context: ReviewContext,
    decision_kind: DecisionKind,
    options: Option<Vec<Value>>,
    timeout: Option<Duration>,
    on_timeout: TimeoutPolicy,
) -> Result<HumanDecision, SinewError> {
    let expires_at = timeout.and_then(|d| {
        chrono::Duration::from_std(d)
            .ok()
            .map(|window| Utc::now() + window)
    });
    let (review, receiver) = PendingReview::new(context, decision_kind, options, expires_at);
    let review_id = review.review_id().clone();

    let sink = config::current()
        .review_sink
        .unwrap_or_else(|| Arc::new(ConsoleReviewSink::default()));

    tracing::debug!(review_id = %review_id, "review emitted");
    sink.emit(review.clone()).await;

    let resolution = match timeout {
        Some(window) => match tokio::time::timeout(window, receiver).await {
            Ok(resolved) => resolved,
            Err(_) => {
                return match on_timeout {
                    TimeoutPolicy::Raise => Err(SinewError::HitlTimeout { review_id }),
                    TimeoutPolicy::Fallback(value) => Ok(HumanDecision {
                        value,
                        reviewer: Some("auto".into()),
                        rationale: Some("timeout".into()),
                        decided_at: Utc::now(),
                        review_id,
                    }),
                };
            }
        },
        None => receiver.await,
    };

    // The slot outlives the wait (we hold `review`), so a closed channel
    // means the process is tearing down; treat it as an expired window.
    resolution.map_err(|_| SinewError::HitlTimeout { review_id })
}
