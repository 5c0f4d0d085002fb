//! Process-wide contract registry.

use crate::shape::{Shape, content_hash};
use serde_json::Value;
use sinew_core::SinewError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock, RwLock};

/// An immutable, registered output shape.
#[derive(Debug)]
pub struct ContractDescriptor {
    name: String,
    shape: Shape,
    schema: Value,
    hash: String,
    opaque_fields: BTreeSet<String>,
}

impl ContractDescriptor {
    /// The name the contract was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The structural shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The JSON Schema rendering of the shape.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// The 12-hex content hash of the schema.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Names of the shape's opaque fields, sorted.
    pub fn opaque_fields(&self) -> &BTreeSet<String> {
        &self.opaque_fields
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<ContractDescriptor>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<ContractDescriptor>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register an output shape under a name.
///
/// Registration is idempotent for identical schemas: re-registering a name
/// with a shape that hashes equal returns the existing descriptor.
/// Re-registering a name with a *different* schema is a compile error —
/// contracts are immutable once declared.
pub fn register(name: impl Into<String>, shape: Shape) -> Result<Arc<ContractDescriptor>, SinewError> {
    let name = name.into();
    let schema = shape.to_json_schema();
    let hash = content_hash(&schema);

    let mut guard = registry().write().expect("contract registry lock");
    if let Some(existing) = guard.get(&name) {
        if existing.hash == hash {
            return Ok(Arc::clone(existing));
        }
        return Err(SinewError::compile(
            format!("contract '{name}'"),
            format!(
                "already registered with a different schema (existing hash {}, new hash {hash})",
                existing.hash
            ),
        ));
    }

    let descriptor = Arc::new(ContractDescriptor {
        opaque_fields: shape.opaque_fields(),
        name: name.clone(),
        shape,
        schema,
        hash,
    });
    guard.insert(name, Arc::clone(&descriptor));
    Ok(descriptor)
}

/// Look up a registered contract by name.
pub fn lookup(name: &str) -> Option<Arc<ContractDescriptor>> {
    registry()
        .read()
        .expect("contract registry lock")
        .get(name)
        .cloned()
}
