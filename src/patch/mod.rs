//! # Patch planning
//!
//! Computes the minimal, rule-checked update between a desired document and
//! what the remote side reports. Everything in here is pure.
//!
//! ```text
//!   desired ─┐
//!            ├─► diff ─► rule checks ─┬─► Ok(PatchPlan { payload, mask, .. })
//!   observed ┘                        └─► Err(PlanError { violations })
//! ```

pub mod diff;
pub mod path;
pub mod planner;
pub mod rules;

pub use diff::{diff, ChangeKind, Diff, FieldChange};
pub use path::{FieldPath, PathSegment};
pub use planner::{fingerprint, plan, PatchPlan, PlanError, Violation};
pub use rules::{Cardinality, CollectionRule, FieldRule, FieldRuleTable};
