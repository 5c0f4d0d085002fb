#![deny(missing_docs)]
//! External-driver flow controller.
//!
//! A variant of the flow engine where an external agent does the model
//! work and this controller does the bookkeeping: it validates a
//! declarative YAML plan (contracts, functions, flows as a DAG of steps
//! wired with `$` references), topologically orders the steps, hands the
//! driver one resolved step descriptor at a time, and checks every
//! reported result — JSON-schema first, then safely-compiled ensure
//! expressions — before advancing.
//!
//! Four operations make up the wire surface, and none of them raises:
//!
//! | Operation | Returns |
//! |-----------|---------|
//! | [`Controller::validate`] | `{valid, errors}` |
//! | [`Controller::plan`] | first step descriptor, or a structured error |
//! | [`Controller::step_done`] | next step, retry envelope, or completion |
//! | [`Controller::audit`] | trace snapshot for a flow |

mod controller;
mod error;
mod expr;
mod plan;
mod refs;
mod state;

pub use controller::Controller;
pub use error::{PlanError, wire_error};
pub use expr::{CompiledEnsure, compile_ensure};
pub use plan::{
    BudgetDef, ContractDef, FieldSpec, FlowDef, FunctionDef, Mode, PlanDoc, StepDef,
    parse_and_validate,
};
pub use refs::{resolve_inputs, resolve_ref};
pub use state::{FlowState, OutputValidator, StepRecord, StepStatus};
