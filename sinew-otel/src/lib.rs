#![deny(missing_docs)]
//! OTLP HTTP/JSON trace exporter.
//!
//! Implements the runtime's [`Tracer`] hook against any OTLP endpoint. No
//! OpenTelemetry SDK dependency: the payload (resource spans → scope spans
//! → one span per step invocation, kind CLIENT, status OK) is built by hand
//! and POSTed fire-and-forget on a background task. All exporter errors are
//! swallowed — telemetry must never affect execution.
//!
//! The span's trace id is the step's flow id with hyphens stripped (a
//! 32-hex id), so every step of a flow lands in one trace. Steps executed
//! outside a flow get a fresh random trace id.
//!
//! ```no_run
//! use sinew_core::config;
//! use sinew_otel::OtlpTracer;
//! use std::sync::Arc;
//!
//! config::update(|cfg| {
//!     cfg.tracer = Some(Arc::new(OtlpTracer::new("http://localhost:4318/v1/traces")));
//! });
//! ```

use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use sinew_core::{TraceAttributes, Tracer};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An OTLP HTTP/JSON exporter for terminal step outcomes.
pub struct OtlpTracer {
    endpoint: String,
    service_name: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OtlpTracer {
    /// Exporter posting to `endpoint` as service `"sinew"` with a 5 second
    /// request timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: "sinew".into(),
            timeout: Duration::from_secs(5),
            client: reqwest::Client::new(),
        }
    }

    /// Override the reported service name.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Tracer for OtlpTracer {
    fn emit(&self, attrs: TraceAttributes) {
        let now_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let body = build_payload(&attrs, &self.service_name, now_ns);

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        // Fire-and-forget; a missing runtime just drops the span.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = client.post(endpoint).timeout(timeout).json(&body).send().await;
            });
        }
    }
}

fn random_hex(chars: usize) -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.truncate(chars);
    hex
}

fn keyvalue(key: &str, value: Value) -> Value {
    json!({"key": key, "value": value})
}

/// Flatten the attribute struct into an OTLP KeyValue list. Absent optional
/// attributes are omitted entirely.
fn attribute_list(attrs: &TraceAttributes) -> Vec<Value> {
    let mut list = vec![
        keyvalue("gen_ai.system", json!({"stringValue": attrs.system})),
        keyvalue("gen_ai.request.model", json!({"stringValue": attrs.model})),
        keyvalue("sinew.step", json!({"stringValue": attrs.step})),
        keyvalue(
            "sinew.contract_hash",
            json!({"stringValue": attrs.contract_hash}),
        ),
        keyvalue(
            "sinew.attempts",
            json!({"intValue": attrs.attempts.to_string()}),
        ),
        keyvalue("sinew.cache_hit", json!({"boolValue": attrs.cache_hit})),
        keyvalue(
            "sinew.duration_ms",
            json!({"intValue": attrs.duration_ms.to_string()}),
        ),
    ];
    if let Some(cost) = attrs.cost_usd.as_ref().and_then(|c| c.to_f64()) {
        list.push(keyvalue("sinew.cost_usd", json!({"doubleValue": cost})));
    }
    if let Some(flow_id) = &attrs.flow_id {
        list.push(keyvalue(
            "sinew.flow_id",
            json!({"stringValue": flow_id.as_str()}),
        ));
    }
    if let Some(tokens) = attrs.input_tokens {
        list.push(keyvalue(
            "gen_ai.usage.input_tokens",
            json!({"intValue": tokens.to_string()}),
        ));
    }
    if let Some(tokens) = attrs.output_tokens {
        list.push(keyvalue(
            "gen_ai.usage.output_tokens",
            json!({"intValue": tokens.to_string()}),
        ));
    }
    list
}

fn build_payload(attrs: &TraceAttributes, service_name: &str, now_ns: u128) -> Value {
    // All spans of one flow share its id as traceId; hyphens stripped to
    // the 32-hex format OTLP requires.
    let trace_id = match &attrs.flow_id {
        Some(flow_id) => flow_id.as_str().replace('-', ""),
        None => random_hex(32),
    };
    let start_ns = now_ns.saturating_sub(u128::from(attrs.duration_ms) * 1_000_000);

    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [keyvalue("service.name", json!({"stringValue": service_name}))],
            },
            "scopeSpans": [{
                "scope": {"name": "sinew", "version": env!("CARGO_PKG_VERSION")},
                "spans": [{
                    "traceId": trace_id,
                    "spanId": random_hex(16),
                    "name": attrs.step,
                    "kind": 3, // CLIENT
                    "startTimeUnixNano": start_ns.to_string(),
                    "endTimeUnixNano": now_ns.to_string(),
                    "attributes": attribute_list(attrs),
                    "status": {"code": 1}, // OK
                }],
            }],
        }]
    })
}
