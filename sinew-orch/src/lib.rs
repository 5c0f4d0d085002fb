#![deny(missing_docs)]
//! Concurrency primitives over sinew steps.
//!
//! Branches are plain futures driven inside the caller's task: the ambient
//! flow context propagates into every branch, and cancelling a losing
//! branch is dropping its future — there is no path by which a cancelled
//! branch's error surfaces unhandled.
//!
//! | Primitive | Contract |
//! |-----------|----------|
//! | [`all`] | input-ordered results; first failure cancels the rest |
//! | [`any`] | first success wins, rest cancelled; all failed → last failure |
//! | [`at_least`] | gather all; ≥ N successes → first N in completion order |
//! | [`collect`] | one [`Outcome`] per branch, input order, never propagates |
//! | [`race`] | alias of [`any`], kept for readability |
//! | [`debate`] | multi-round agent exchange ending in a synthesiser call |
//! | [`refine`] | outer convergence loop around one step |

mod debate;
mod parallel;
mod refine;

pub use debate::{DebateTurn, Debater, Synthesis, debate};
pub use parallel::{Outcome, all, all_validated, any, at_least, collect, race};
pub use refine::refine;
