#![deny(missing_docs)]
//! Flow-scoped execution context.
//!
//! A flow establishes a [`FlowContext`] — flow id, shared budget envelope,
//! and session cache — for everything executed inside it. The context is a
//! task-local scoped value: futures composed within the scope (including
//! concurrently driven step branches) observe it, code outside sees none.
//!
//! ```no_run
//! use sinew_core::Budget;
//!
//! # async fn steps() {}
//! # async fn demo() {
//! let result = sinew_flow::scope(Some(Budget::from_ms(5_000)), async {
//!     // every step executed here shares the flow id, budget, and cache
//!     steps().await
//! })
//! .await;
//! # }
//! ```
//!
//! Session-cache entries written inside one flow are invisible to every
//! other flow. Step executions outside any flow fall back to a process-wide
//! map with the same key scheme.

use serde_json::Value;
use sinew_core::{Budget, FlowId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

tokio::task_local! {
    static FLOW: FlowContext;
}

type SessionCache = Arc<Mutex<HashMap<String, Value>>>;

/// The ambient context of one flow execution.
///
/// Cloning shares the underlying budget counters and session cache: a
/// clone is a handle, not a fork.
#[derive(Debug, Clone)]
pub struct FlowContext {
    flow_id: FlowId,
    budget: Option<Budget>,
    session_cache: SessionCache,
}

impl FlowContext {
    fn new(budget: Option<Budget>) -> Self {
        Self {
            flow_id: FlowId::random(),
            budget,
            session_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// This flow's identifier.
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// The flow's shared budget envelope, if one was declared.
    pub fn budget(&self) -> Option<&Budget> {
        self.budget.as_ref()
    }

    /// Read a session-cache entry.
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.session_cache
            .lock()
            .expect("session cache lock")
            .get(key)
            .cloned()
    }

    /// Write a session-cache entry.
    pub fn cache_put(&self, key: impl Into<String>, value: Value) {
        self.session_cache
            .lock()
            .expect("session cache lock")
            .insert(key.into(), value);
    }

    /// Re-enter this context around a future.
    ///
    /// Futures driven inside a flow inherit the context automatically; this
    /// is for explicitly spawned tasks, which start with a fresh task-local
    /// environment:
    ///
    /// ```no_run
    /// # async fn demo() {
    /// let ctx = sinew_flow::current().unwrap();
    /// tokio::spawn(ctx.scope(async { /* runs inside the flow */ }));
    /// # }
    /// ```
    pub async fn scope<F: Future>(self, f: F) -> F::Output {
        FLOW.scope(self, f).await
    }
}

/// Run a future inside a fresh flow context.
///
/// The declared budget is restarted on entry (`fresh()`), so the flow's
/// clock starts when execution starts, and the same envelope is shared by
/// every step executed inside.
pub async fn scope<F: Future>(budget: Option<Budget>, f: F) -> F::Output {
    let ctx = FlowContext::new(budget.map(|b| b.fresh()));
    FLOW.scope(ctx, f).await
}

/// The ambient flow context, if the caller is running inside one.
pub fn current() -> Option<FlowContext> {
    FLOW.try_with(|ctx| ctx.clone()).ok()
}

fn fallback_cache() -> &'static Mutex<HashMap<String, Value>> {
    static FALLBACK: OnceLock<Mutex<HashMap<String, Value>>> = OnceLock::new();
    FALLBACK.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Read a session-cache entry: the ambient flow's cache inside a flow, the
/// process-wide fallback map outside one.
pub fn session_get(key: &str) -> Option<Value> {
    match current() {
        Some(ctx) => ctx.cache_get(key),
        None => fallback_cache()
            .lock()
            .expect("fallback cache lock")
            .get(key)
            .cloned(),
    }
}

/// Write a session-cache entry, scoped the same way as [`session_get`].
pub fn session_put(key: impl Into<String>, value: Value) {
    match current() {
        Some(ctx) => ctx.cache_put(key, value),
        None => {
            fallback_cache()
                .lock()
                .expect("fallback cache lock")
                .insert(key.into(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn no_flow_outside_scope() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn scope_establishes_and_tears_down() {
        let id = scope(None, async {
            let ctx = current().expect("inside flow");
            ctx.flow_id().clone()
        })
        .await;
        assert!(!id.as_str().is_empty());
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn nested_futures_inherit_context() {
        scope(Some(Budget::from_ms(60_000)), async {
            let outer = current().unwrap().flow_id().clone();
            let inner = async { current().unwrap().flow_id().clone() }.await;
            assert_eq!(outer, inner);
            assert!(current().unwrap().budget().is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn session_cache_is_flow_scoped() {
        scope(None, async {
            session_put("k", json!(1));
            assert_eq!(session_get("k"), Some(json!(1)));
        })
        .await;

        // A fresh flow does not see the first flow's entries.
        scope(None, async {
            assert_eq!(session_get("k"), None);
        })
        .await;
    }

    #[tokio::test]
    async fn fallback_cache_outside_flows() {
        session_put("fallback_test_key", json!("v"));
        assert_eq!(session_get("fallback_test_key"), Some(json!("v")));

        // Flows do not observe the fallback map.
        scope(None, async {
            assert_eq!(session_get("fallback_test_key"), None);
        })
        .await;
    }

    #[tokio::test]
    async fn spawned_tasks_reenter_via_context_scope() {
        scope(None, async {
            let ctx = current().unwrap();
            let expected = ctx.flow_id().clone();
            let handle = tokio::spawn(ctx.scope(async { current().unwrap().flow_id().clone() }));
            assert_eq!(handle.await.unwrap(), expected);
        })
        .await;
    }
}
