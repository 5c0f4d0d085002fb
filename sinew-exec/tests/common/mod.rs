//! Shared test support: a canned-response provider routed by model id.
//!
//! The runtime's provider is process-global, but tests run concurrently in
//! one binary. Each test declares its step with a unique model id and
//! enqueues responses under that id; the router dispatches accordingly.
#![allow(dead_code)] // each test binary uses a different subset

use rust_decimal::Decimal;
use sinew_core::{
    Provider, ProviderError, ProviderRequest, ProviderResponse, TokenUsage, ToolCall, config,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

type CannedResult = Result<ProviderResponse, ProviderError>;

#[derive(Default)]
pub struct RouterProvider {
    routes: Mutex<HashMap<String, VecDeque<(Option<Duration>, CannedResult)>>>,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl RouterProvider {
    /// The process-wide router, installed into the runtime config on first
    /// use.
    pub fn install() -> Arc<RouterProvider> {
        static ROUTER: OnceLock<Arc<RouterProvider>> = OnceLock::new();
        let router = ROUTER
            .get_or_init(|| {
                let router = Arc::new(RouterProvider::default());
                let for_config = Arc::clone(&router);
                config::update(move |cfg| cfg.provider = Some(for_config));
                router
            })
            .clone();
        router
    }

    pub fn enqueue(&self, model: &str, result: CannedResult) {
        self.routes
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back((None, result));
    }

    pub fn enqueue_delayed(&self, model: &str, delay: Duration, result: CannedResult) {
        self.routes
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back((Some(delay), result));
    }

    /// Requests captured for one model id, in call order.
    pub fn calls_for(&self, model: &str) -> Vec<ProviderRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for RouterProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let entry = {
            let mut routes = self.routes.lock().unwrap();
            let queue = routes
                .get_mut(&request.model)
                .unwrap_or_else(|| panic!("no responses queued for model '{}'", request.model));
            let entry = queue
                .pop_front()
                .unwrap_or_else(|| panic!("responses for model '{}' exhausted", request.model));
            self.calls.lock().unwrap().push(request);
            entry
        };
        if let Some(delay) = entry.0 {
            tokio::time::sleep(delay).await;
        }
        entry.1
    }
}

/// A response whose single tool call carries the given JSON arguments.
pub fn tool_response(arguments: &str, cost: Option<Decimal>) -> ProviderResponse {
    ProviderResponse {
        tool_calls: vec![ToolCall {
            name: "output".into(),
            arguments: arguments.to_string(),
        }],
        usage: TokenUsage {
            input_tokens: 25,
            output_tokens: 10,
            ..Default::default()
        },
        model: "mock-model".into(),
        cost,
    }
}

/// A response with no tool call at all.
pub fn bare_response() -> ProviderResponse {
    ProviderResponse {
        tool_calls: vec![],
        usage: TokenUsage::default(),
        model: "mock-model".into(),
        cost: None,
    }
}

/// Concatenated text of a request's user blocks.
pub fn user_text(request: &ProviderRequest) -> String {
    request.user.iter().map(|b| b.text.clone()).collect()
}
