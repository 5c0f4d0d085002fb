//! Process-wide runtime configuration.
//!
//! Set once at startup, read by the executor on every invocation. Per-step
//! annotations (model, temperature, budget) override these defaults.
//!
//! ```no_run
//! use sinew_core::config;
//!
//! config::update(|cfg| {
//!     cfg.default_model = "claude-sonnet-4-6".into();
//!     cfg.test_mode = true;
//!     cfg.sample_n = 5;
//! });
//! ```

use crate::provider::Provider;
use crate::review::ReviewSink;
use crate::trace::Tracer;
use std::sync::{Arc, OnceLock, RwLock};

/// Global runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// The provider adapter every step calls through. Steps fail their
    /// first provider call when none is configured.
    pub provider: Option<Arc<dyn Provider>>,
    /// The sink human reviews are presented on. `await_human` falls back to
    /// the console sink when none is configured.
    pub review_sink: Option<Arc<dyn ReviewSink>>,
    /// Export hook invoked at every terminal trace write. None disables
    /// export; the in-memory trace store is unaffected.
    pub tracer: Option<Arc<dyn Tracer>>,
    /// Model used by steps that declare none.
    pub default_model: String,
    /// When true, stable steps are sampled `sample_n` times and checked for
    /// agreement; unstable steps collect full distributions.
    pub test_mode: bool,
    /// Samples per step execution in test mode.
    pub sample_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: None,
            review_sink: None,
            tracer: None,
            default_model: "claude-sonnet-4-6".into(),
            test_mode: false,
            sample_n: 5,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("provider", &self.provider.as_ref().map(|_| "<provider>"))
            .field("review_sink", &self.review_sink.as_ref().map(|_| "<sink>"))
            .field("tracer", &self.tracer.as_ref().map(|_| "<tracer>"))
            .field("default_model", &self.default_model)
            .field("test_mode", &self.test_mode)
            .field("sample_n", &self.sample_n)
            .finish()
    }
}

fn store() -> &'static RwLock<Config> {
    static STORE: OnceLock<RwLock<Config>> = OnceLock::new();
    STORE.get_or_init(|| RwLock::new(Config::default()))
}

/// Snapshot of the current configuration.
pub fn current() -> Config {
    store().read().expect("config lock").clone()
}

/// Apply an in-place update to the global configuration.
pub fn update(f: impl FnOnce(&mut Config)) {
    let mut guard = store().write().expect("config lock");
    f(&mut guard);
}
