//! Contract registry for the sinew runtime.
//!
//! A contract is a registered, typed output shape with a stable content
//! hash. Steps reference contracts to describe what the model must return;
//! the executor delivers the schema through the provider's structured-output
//! channel and validates responses against it.
//!
//! The content hash is determined solely by the schema: identical shapes
//! registered under different declarations hash equal, and the hash is the
//! first 12 hex characters of SHA-256 over canonical JSON (keys sorted, no
//! whitespace).

#![deny(missing_docs)]

mod registry;
mod shape;

pub use registry::{ContractDescriptor, lookup, register};
pub use shape::{FieldDef, Shape, content_hash};
