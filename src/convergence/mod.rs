//! # Convergence
//!
//! Polls a remote resource until it reaches a stable state.
//!
//! ```text
//!   refresh ──► classify ──┬── target  ──► Ok(Converged)
//!      ▲                   ├── pending ──► sleep(interval) ──┐
//!      │                   └── unknown ──► Err(Failed)       │
//!      └─────────────────────────────────────────────────────┘
//!            deadline ──► Err(Timeout)   cancel ──► Err(Cancelled)
//! ```

use std::time::Duration;

pub mod http;
pub mod poller;
pub mod probe;
pub mod state;

pub use http::{classify_status, extract_state, HttpProbe, StatusClass};
pub use poller::{
    await_convergence, Converged, ConvergenceError, ConvergenceSpec, FailureReason, SpecError,
};
pub use probe::{
    probe_fn, FnProbe, NotFoundPolicy, ProbeContext, ProbeError, ProbeOutcome, RefreshProbe,
    RetryingProbe,
};
pub use state::{Classification, OverlappingStates, ResourceState, StateClassifier, StateSet};

/// Floor on the spacing between two probe calls
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval when the caller does not set one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Session timeout when the caller does not set one
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Longest span a session deadline is placed ahead; larger timeouts are
/// treated as unbounded
pub const MAX_SESSION_SPAN: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Consecutive "not found" reads tolerated before a session fails
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// Attempts a [`RetryingProbe`] makes per refresh call
pub const DEFAULT_PROBE_RETRY_BUDGET: u32 = 20;
