//! Cache keying and the process-wide global cache.
//!
//! Session-cached steps key on `(step name, inputs hash)` inside the
//! ambient flow's session map (see `sinew_flow`). Globally cached steps add
//! the contract hash to the key — a contract change invalidates the entry —
//! and live in the process-wide map below.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sinew_core::Inputs;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, OnceLock};

/// Stable 16-hex hash of the input bindings, independent of binding order.
pub(crate) fn inputs_hash(inputs: &Inputs) -> String {
    let sorted: BTreeMap<&str, &Value> = inputs.iter().collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn global_cache() -> &'static Mutex<HashMap<String, Value>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Value>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn global_get(key: &str) -> Option<Value> {
    global_cache()
        .lock()
        .expect("global cache lock")
        .get(key)
        .cloned()
}

pub(crate) fn global_put(key: String, value: Value) {
    global_cache()
        .lock()
        .expect("global cache lock")
        .insert(key, value);
}
