//! Step executor state machine: retries, budgets, caching, quorum.

mod common;

use common::{RouterProvider, bare_response, tool_response, user_text};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sinew_contract::Shape;
use sinew_core::{Budget, Inputs, SinewError, trace};
use sinew_exec::{CachePolicy, Step};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sentiment {
    label: String,
    confidence: f64,
}

fn sentiment_shape() -> Shape {
    use sinew_contract::FieldDef;
    Shape::object(vec![
        FieldDef::new(
            "label",
            Shape::Enum(vec!["positive".into(), "negative".into()]),
        ),
        FieldDef::new("confidence", Shape::Number),
    ])
}

fn sentiment_step(name: &str, model: &str) -> Step<Sentiment> {
    Step::<Sentiment>::builder(name)
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .build()
        .unwrap()
}

#[tokio::test]
async fn success_on_first_attempt_writes_one_trace() {
    let router = RouterProvider::install();
    let model = "exec-success";
    router.enqueue(
        model,
        Ok(tool_response(
            r#"{"label":"positive","confidence":0.92}"#,
            Some(Decimal::new(1, 4)),
        )),
    );

    let step = sentiment_step("exec_success", model);
    let out = step
        .call(Inputs::new().bind("text", "what a release"))
        .await
        .unwrap();
    assert_eq!(out.label, "positive");

    let records: Vec<_> = trace::all_records()
        .into_iter()
        .filter(|r| r.step == "exec_success")
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 1);
    assert!(records[0].retry_reasons.is_empty());
    assert!(!records[0].cache_hit);
    assert_eq!(records[0].cost_usd, Some(Decimal::new(1, 4)));
    assert_eq!(records[0].compiled_prompt_hash.len(), 12);
}

#[tokio::test]
async fn retry_feedback_is_injected_into_second_prompt() {
    let router = RouterProvider::install();
    let model = "exec-retry-feedback";
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"positive","confidence":0.3}"#, None)),
    );
    router.enqueue(
        model,
        Ok(tool_response(
            r#"{"label":"positive","confidence":0.95}"#,
            None,
        )),
    );

    let step = Step::<Sentiment>::builder("exec_retry_feedback")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .ensure("confidence_above_09", |s: &Sentiment| s.confidence > 0.9)
        .retries(2)
        .build()
        .unwrap();

    let out = step
        .call(Inputs::new().bind("text", "mixed feelings"))
        .await
        .unwrap();
    assert_eq!(out.confidence, 0.95);

    let calls = router.calls_for(model);
    assert_eq!(calls.len(), 2);
    assert!(!user_text(&calls[0]).contains("Previous attempt failed"));
    let second = user_text(&calls[1]);
    assert!(second.contains("Previous attempt failed:"));
    assert!(second.contains("confidence_above_09"));
    assert!(second.contains("Fix these issues specifically."));

    let records: Vec<_> = trace::all_records()
        .into_iter()
        .filter(|r| r.step == "exec_retry_feedback")
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].retry_reasons.len(), 1);
}

#[tokio::test]
async fn cost_budget_stops_before_second_call() {
    let router = RouterProvider::install();
    let model = "exec-cost-budget";
    // Each call costs $0.005 against a $0.001 ceiling; the postcondition
    // never passes, so only the budget stops the loop.
    for _ in 0..4 {
        router.enqueue(
            model,
            Ok(tool_response(
                r#"{"label":"positive","confidence":0.1}"#,
                Some(Decimal::new(5, 3)),
            )),
        );
    }

    let step = Step::<Sentiment>::builder("exec_cost_budget")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .ensure("never", |_s: &Sentiment| false)
        .budget(Budget::from_usd(Decimal::new(1, 3)))
        .retries(3)
        .build()
        .unwrap();

    let err = step
        .call(Inputs::new().bind("text", "pricey"))
        .await
        .unwrap_err();
    assert!(matches!(err, SinewError::Budget { .. }));
    assert_eq!(router.calls_for(model).len(), 1);
}

#[tokio::test]
async fn time_budget_cancels_inflight_call() {
    let router = RouterProvider::install();
    let model = "exec-time-budget";
    router.enqueue_delayed(
        model,
        Duration::from_millis(500),
        Ok(tool_response(r#"{"label":"positive","confidence":0.9}"#, None)),
    );

    let step = Step::<Sentiment>::builder("exec_time_budget")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .budget(Budget::from_ms(40))
        .build()
        .unwrap();

    let err = step
        .call(Inputs::new().bind("text", "slow provider"))
        .await
        .unwrap_err();
    assert!(matches!(err, SinewError::Budget { .. }));
}

#[tokio::test]
async fn precondition_failure_makes_no_call_and_no_trace() {
    let router = RouterProvider::install();
    let model = "exec-precondition";

    let step = Step::<Sentiment>::builder("exec_precondition")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .require("text_not_empty", |inputs: &Inputs| {
            inputs
                .get("text")
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.is_empty())
        })
        .build()
        .unwrap();

    let err = step
        .call(Inputs::new().bind("text", ""))
        .await
        .unwrap_err();
    match err {
        SinewError::Precondition { step, condition } => {
            assert_eq!(step, "exec_precondition");
            assert_eq!(condition, "text_not_empty");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(router.calls_for(model).is_empty());
    assert!(
        trace::all_records()
            .iter()
            .all(|r| r.step != "exec_precondition")
    );
}

#[tokio::test]
async fn parse_failures_exhaust_into_parse_error() {
    let router = RouterProvider::install();
    let model = "exec-parse-exhaust";
    router.enqueue(model, Ok(tool_response("not json at all", None)));
    router.enqueue(model, Ok(bare_response()));

    let step = Step::<Sentiment>::builder("exec_parse_exhaust")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .retries(1)
        .build()
        .unwrap();

    let err = step
        .call(Inputs::new().bind("text", "whatever"))
        .await
        .unwrap_err();
    match &err {
        SinewError::Parse { step, message, .. } => {
            assert_eq!(step, "exec_parse_exhaust");
            assert!(message.contains("No tool call in response"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let records: Vec<_> = trace::all_records()
        .into_iter()
        .filter(|r| r.step == "exec_parse_exhaust")
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].retry_reasons.len(), 2);
    assert!(records[0].output.is_none());
}

#[tokio::test]
async fn contract_mismatch_is_parse_class_and_retried() {
    let router = RouterProvider::install();
    let model = "exec-contract-mismatch";
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"positive"}"#, None)), // missing confidence
    );
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"positive","confidence":0.8}"#, None)),
    );

    let step = sentiment_step("exec_contract_mismatch", model);
    let out = step
        .call(Inputs::new().bind("text", "fine"))
        .await
        .unwrap();
    assert_eq!(out.confidence, 0.8);
    assert_eq!(router.calls_for(model).len(), 2);
}

#[tokio::test]
async fn provider_error_is_parse_class_feedback() {
    let router = RouterProvider::install();
    let model = "exec-provider-error";
    router.enqueue(
        model,
        Err(sinew_core::ProviderError::RequestFailed("boom".into())),
    );
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"negative","confidence":0.7}"#, None)),
    );

    let step = sentiment_step("exec_provider_error", model);
    let out = step
        .call(Inputs::new().bind("text", "flaky network"))
        .await
        .unwrap();
    assert_eq!(out.label, "negative");

    let calls = router.calls_for(model);
    assert_eq!(calls.len(), 2);
    assert!(user_text(&calls[1]).contains("Provider call failed"));
}

#[tokio::test]
async fn session_cache_hits_within_flow_and_misses_across_flows() {
    let router = RouterProvider::install();
    let model = "exec-session-cache";
    for _ in 0..2 {
        router.enqueue(
            model,
            Ok(tool_response(r#"{"label":"positive","confidence":0.9}"#, None)),
        );
    }

    let step = Step::<Sentiment>::builder("exec_session_cache")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .cache(CachePolicy::Session)
        .build()
        .unwrap();

    sinew_flow::scope(None, async {
        step.call(Inputs::new().bind("text", "same")).await.unwrap();
        step.call(Inputs::new().bind("text", "same")).await.unwrap();
    })
    .await;
    // Two calls inside one flow: exactly one provider call.
    assert_eq!(router.calls_for(model).len(), 1);

    // A fresh flow cannot see the first flow's session entries.
    sinew_flow::scope(None, async {
        step.call(Inputs::new().bind("text", "same")).await.unwrap();
    })
    .await;
    assert_eq!(router.calls_for(model).len(), 2);

    let records: Vec<_> = trace::all_records()
        .into_iter()
        .filter(|r| r.step == "exec_session_cache")
        .collect();
    assert_eq!(records.len(), 3);
    let hit = records.iter().find(|r| r.cache_hit).unwrap();
    assert_eq!(hit.attempts, 0);
    assert_eq!(hit.duration_ms, 0);
}

#[tokio::test]
async fn cached_value_is_revalidated_against_current_postconditions() {
    let router = RouterProvider::install();
    let model = "exec-cache-revalidate";
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"positive","confidence":0.6}"#, None)),
    );

    let lenient = Step::<Sentiment>::builder("exec_cache_revalidate")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .cache(CachePolicy::Session)
        .build()
        .unwrap();

    // Same name and inputs, stricter postcondition: the cached 0.6 must
    // not satisfy it.
    let strict = Step::<Sentiment>::builder("exec_cache_revalidate")
        .intent("Classify the sentiment of the text")
        .model(model)
        .returns(sentiment_shape())
        .cache(CachePolicy::Session)
        .ensure("very_confident", |s: &Sentiment| s.confidence > 0.9)
        .build()
        .unwrap();

    sinew_flow::scope(None, async {
        lenient
            .call(Inputs::new().bind("text", "same"))
            .await
            .unwrap();
        let err = strict
            .call(Inputs::new().bind("text", "same"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinewError::Postcondition { .. }));
    })
    .await;
    assert_eq!(router.calls_for(model).len(), 1);
}

#[tokio::test]
async fn flow_budget_is_shared_across_steps() {
    let router = RouterProvider::install();
    let model = "exec-flow-budget";
    for _ in 0..2 {
        router.enqueue(
            model,
            Ok(tool_response(
                r#"{"label":"positive","confidence":0.9}"#,
                Some(Decimal::new(6, 3)), // $0.006 per call
            )),
        );
    }

    let step = sentiment_step("exec_flow_budget", model);

    // Flow ceiling $0.01: the first call spends $0.006, the second trips
    // the shared envelope before calling the provider.
    let (first, second) = sinew_flow::scope(
        Some(Budget::from_usd(Decimal::new(1, 2))),
        async {
            let first = step.call(Inputs::new().bind("text", "one")).await;
            let _ = step.call(Inputs::new().bind("text", "two")).await;
            let third = step.call(Inputs::new().bind("text", "three")).await;
            (first, third)
        },
    )
    .await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(SinewError::Budget { .. })));
    assert!(router.calls_for(model).len() <= 2);
}

#[tokio::test]
async fn opaque_inputs_travel_as_attachment_only() {
    let router = RouterProvider::install();
    let model = "exec-opaque";
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"positive","confidence":0.9}"#, None)),
    );

    let step = Step::<Sentiment>::builder("exec_opaque")
        .intent("Assess the sentiment of the attached document")
        .model(model)
        .returns(sentiment_shape())
        .opaque("document")
        .build()
        .unwrap();

    step.call(
        Inputs::new()
            .bind("question", "overall tone?")
            .bind("document", "CONFIDENTIAL BODY"),
    )
    .await
    .unwrap();

    let calls = router.calls_for(model);
    let text = user_text(&calls[0]);
    assert!(text.contains("See attached data for: document"));
    // The value rides after the Data: delimiter, never inline.
    let (prompt_part, data_part) = text.split_once("\n\nData:\n").unwrap();
    assert!(!prompt_part.contains("CONFIDENTIAL BODY"));
    assert!(data_part.contains("CONFIDENTIAL BODY"));
}

#[tokio::test]
async fn quorum_returns_highest_confidence_agreer() {
    let router = RouterProvider::install();
    let model = "exec-quorum";
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"yes","confidence":0.7}"#, None)),
    );
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"yes","confidence":0.95}"#, None)),
    );
    router.enqueue(
        model,
        Ok(tool_response(r#"{"label":"no","confidence":0.8}"#, None)),
    );

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Verdict {
        label: String,
        confidence: f64,
    }

    let step = Step::<Verdict>::builder("exec_quorum")
        .intent("Vote on the proposition")
        .model(model)
        .returns(Shape::object(vec![
            sinew_contract::FieldDef::new("label", Shape::String),
            sinew_contract::FieldDef::new("confidence", Shape::Number),
        ]))
        .agree_on("label")
        .quorum(3, 2)
        .build()
        .unwrap();

    let verdict = step
        .call(Inputs::new().bind("proposition", "ship friday"))
        .await
        .unwrap();
    assert_eq!(verdict.label, "yes");
    assert_eq!(verdict.confidence, 0.95);
    assert_eq!(router.calls_for(model).len(), 3);
}

#[tokio::test]
async fn quorum_without_agreement_is_consensus_failure() {
    let router = RouterProvider::install();
    let model = "exec-quorum-split";
    for label in ["a", "b", "c"] {
        router.enqueue(
            model,
            Ok(tool_response(
                &format!(r#"{{"label":"{label}","confidence":0.9}}"#),
                None,
            )),
        );
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Verdict {
        label: String,
        confidence: f64,
    }

    let step = Step::<Verdict>::builder("exec_quorum_split")
        .intent("Vote on the proposition")
        .model(model)
        .returns(Shape::object(vec![
            sinew_contract::FieldDef::new("label", Shape::String),
            sinew_contract::FieldDef::new("confidence", Shape::Number),
        ]))
        .agree_on("label")
        .quorum(3, 2)
        .build()
        .unwrap();

    let err = step
        .call(Inputs::new().bind("proposition", "split vote"))
        .await
        .unwrap_err();
    match err {
        SinewError::Consensus {
            quorum,
            threshold,
            outputs,
            ..
        } => {
            assert_eq!(quorum, 3);
            assert_eq!(threshold, 2);
            assert_eq!(outputs.len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn primitive_return_is_unwrapped() {
    let router = RouterProvider::install();
    let model = "exec-primitive";
    router.enqueue(model, Ok(tool_response(r#"{"value":"a short name"}"#, None)));

    let step = Step::<String>::builder("exec_primitive")
        .intent("Suggest a project name")
        .model(model)
        .returns(Shape::String)
        .build()
        .unwrap();

    let name = step
        .call(Inputs::new().bind("theme", "weaving"))
        .await
        .unwrap();
    assert_eq!(name, "a short name");

    // The tool schema wrapped the primitive as {value: string}.
    let calls = router.calls_for(model);
    assert_eq!(
        calls[0].tool.parameters["properties"]["value"]["type"],
        "string"
    );
}
