//! Default review sink: terminal prompt with background stdin collection.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sinew_core::{DecisionKind, HumanDecision, PendingReview, ReviewSink};
use std::io::BufRead;

/// Presents reviews on stdout and collects decisions from stdin.
///
/// `emit` returns immediately: input collection runs on a background task
/// so the caller's timeout can race the reviewer. Mistyped input is
/// reported and re-prompted.
#[derive(Debug, Default)]
pub struct ConsoleReviewSink;

/// Interpret one line of input for a review. An index selects from the
/// offered options; otherwise the raw text is coerced to the expected
/// decision kind.
fn parse_line(line: &str, options: Option<&[Value]>, kind: DecisionKind) -> Value {
    let trimmed = line.trim();
    if let Some(options) = options {
        if let Ok(index) = trimmed.parse::<usize>() {
            if let Some(choice) = options.get(index) {
                return choice.clone();
            }
        }
    }
    match kind {
        DecisionKind::String => Value::String(trimmed.to_string()),
        DecisionKind::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        DecisionKind::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .unwrap_or_else(|| Value::String(trimmed.to_string())),
        DecisionKind::Boolean => match trimmed.to_lowercase().as_str() {
            "y" | "yes" | "true" => Value::Bool(true),
            "n" | "no" | "false" => Value::Bool(false),
            _ => Value::String(trimmed.to_string()),
        },
        DecisionKind::Object => {
            serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
        }
    }
}

fn read_stdin_line() -> Option<String> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => None, // EOF
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

async fn collect_input(review: PendingReview) {
    loop {
        let Some(line) = tokio::task::spawn_blocking(read_stdin_line)
            .await
            .ok()
            .flatten()
        else {
            return;
        };

        let value = parse_line(&line, review.options(), review.decision_kind());
        let decision = HumanDecision {
            value,
            reviewer: None,
            rationale: None,
            decided_at: Utc::now(),
            review_id: review.review_id().clone(),
        };
        match review.resolve(decision) {
            Ok(()) => return,
            Err(sinew_core::review::ResolveError::AlreadyResolved) => return,
            Err(err) => {
                println!("[review] invalid input: {err}. Please try again.");
                print!("Decision: ");
            }
        }
    }
}

#[async_trait]
impl ReviewSink for ConsoleReviewSink {
    async fn emit(&self, review: PendingReview) {
        println!("\n[review] {}", review.context().question);
        if let Some(options) = review.options() {
            for (i, option) in options.iter().enumerate() {
                println!("  [{i}] {option}");
            }
        }
        print!("Decision: ");

        // Fire-and-forget: collection must not block emit, so the awaiting
        // flow's timeout can race the reviewer.
        tokio::spawn(collect_input(review));
    }
}
