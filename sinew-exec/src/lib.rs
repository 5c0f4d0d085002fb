#![deny(missing_docs)]
//! Step executor for the sinew runtime.
//!
//! A [`Step`] is the unit the runtime dispatches: an intent, a typed output
//! contract, preconditions, postconditions, and budgets, built once with
//! [`StepBuilder`] and invoked many times. Each invocation runs the state
//! machine
//!
//! ```text
//! precheck → lookup → compile → call → parse → postcheck → {success | retry | fail}
//! ```
//!
//! Preconditions fail fast, before cache or provider are touched. Cache hits
//! are revalidated against the step's *current* postconditions. Provider
//! calls run under the minimum of the step budget's and the ambient flow
//! budget's remaining time. Parse and postcondition failures feed the next
//! attempt's prompt as retry feedback, up to the retry ceiling. Exactly one
//! trace record is appended per terminal outcome.

mod cache;
mod executor;
mod quorum;
mod spec;

pub use spec::{CachePolicy, Step, StepBuilder};
