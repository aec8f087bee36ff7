//! Lifecycle reconciliation for remote control-plane resources.
//!
//! - [`convergence`] polls a resource until it reaches a stable state
//! - [`patch`] plans minimal, rule-checked partial updates
//! - [`kinds`] holds the per-kind state and field-rule tables
//! - [`lifecycle`] drives create, update and delete over a [`lifecycle::ResourceClient`]

pub mod cli;
pub mod config;
pub mod convergence;
pub mod kinds;
pub mod lifecycle;
pub mod patch;

pub use convergence::{
    await_convergence, Converged, ConvergenceError, ConvergenceSpec, HttpProbe, NotFoundPolicy,
    ProbeContext, ProbeError, ProbeOutcome, RefreshProbe, ResourceState, RetryingProbe,
};
pub use kinds::{Operation, ResourceKind};
pub use lifecycle::{Lifecycle, LifecycleError, LifecyclePhase, ResourceClient, UpdateOutcome};
pub use patch::{plan, FieldRuleTable, PatchPlan, PlanError, Violation};
