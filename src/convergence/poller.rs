//! Convergence poller
//!
//! Drives a refresh probe until the resource reports a target state, the
//! session deadline passes, the probe fails, or the caller cancels. The
//! poller suspends the calling task; it never spawns workers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::probe::{NotFoundPolicy, ProbeContext, ProbeError, ProbeOutcome, RefreshProbe};
use super::state::{Classification, OverlappingStates, ResourceState, StateClassifier, StateSet};
use super::{
    DEFAULT_CONVERGENCE_TIMEOUT, DEFAULT_POLL_INTERVAL, MAX_SESSION_SPAN, MIN_POLL_INTERVAL,
};

/// Errors building a [`ConvergenceSpec`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error(transparent)]
    Overlapping(#[from] OverlappingStates),

    #[error("Target state set is empty")]
    EmptyTarget,
}

/// Why a session stopped without converging or timing out
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("unexpected state '{state}' (pending {pending}, target {target})")]
    UnexpectedState {
        state: ResourceState,
        pending: StateSet,
        target: StateSet,
    },

    #[error("resource not found")]
    NotFound,

    #[error("resource still not found after {0} consecutive checks")]
    NotFoundBudgetExhausted(u32),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Terminal errors of a polling session.
///
/// Every variant carries the last pending snapshot seen, if any, so the
/// caller can tell whether partial progress happened.
#[derive(Error, Debug)]
pub enum ConvergenceError<S: fmt::Debug> {
    /// Still pending when the deadline passed; safe to keep polling externally
    #[error(
        "Timed out after {elapsed:?} waiting for {target} (last state: {})",
        state_or_none(.last_state)
    )]
    Timeout {
        elapsed: Duration,
        target: StateSet,
        last_state: Option<ResourceState>,
        last_snapshot: Option<S>,
    },

    /// Definitive failure; do not retry automatically
    #[error("Convergence failed after {polls} polls: {reason}")]
    Failed {
        reason: FailureReason,
        polls: u32,
        last_snapshot: Option<S>,
    },

    #[error("Convergence cancelled after {elapsed:?}")]
    Cancelled {
        elapsed: Duration,
        last_snapshot: Option<S>,
    },
}

fn state_or_none(state: &Option<ResourceState>) -> &str {
    state.as_ref().map_or("none", ResourceState::as_str)
}

impl<S: fmt::Debug> ConvergenceError<S> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvergenceError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvergenceError::Cancelled { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConvergenceError::Failed { .. })
    }

    /// Timeouts and cancellations may be retried; failures may not
    pub fn is_retryable(&self) -> bool {
        !self.is_failed()
    }

    pub fn last_snapshot(&self) -> Option<&S> {
        match self {
            ConvergenceError::Timeout { last_snapshot, .. }
            | ConvergenceError::Failed { last_snapshot, .. }
            | ConvergenceError::Cancelled { last_snapshot, .. } => last_snapshot.as_ref(),
        }
    }

    pub fn into_last_snapshot(self) -> Option<S> {
        match self {
            ConvergenceError::Timeout { last_snapshot, .. }
            | ConvergenceError::Failed { last_snapshot, .. }
            | ConvergenceError::Cancelled { last_snapshot, .. } => last_snapshot,
        }
    }
}

/// A successful polling session
#[derive(Debug, Clone)]
pub struct Converged<S> {
    /// The read that matched the target set. `None` only when a miss was
    /// mapped to the target through [`NotFoundPolicy::TreatAs`].
    pub snapshot: Option<S>,
    pub state: ResourceState,
    pub polls: u32,
    pub elapsed: Duration,
    pub converged_at: DateTime<Utc>,
}

impl<S> Converged<S> {
    pub fn into_snapshot(self) -> Option<S> {
        self.snapshot
    }
}

/// One polling session: which states to wait through, which to wait for,
/// how often to look and for how long
pub struct ConvergenceSpec<P> {
    classifier: StateClassifier,
    interval: Duration,
    timeout: Duration,
    probe: P,
    label: String,
}

impl<P: RefreshProbe> ConvergenceSpec<P> {
    pub fn new(pending: StateSet, target: StateSet, probe: P) -> Result<Self, SpecError> {
        if target.is_empty() {
            return Err(SpecError::EmptyTarget);
        }

        Ok(Self {
            classifier: StateClassifier::new(pending, target)?,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CONVERGENCE_TIMEOUT,
            probe,
            label: "resource".to_string(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name used in log lines (e.g. "cluster create c-42")
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Accept extra states as "still converging"
    pub fn tolerate(
        mut self,
        states: impl IntoIterator<Item = ResourceState>,
    ) -> Result<Self, SpecError> {
        self.classifier = self.classifier.tolerate(states)?;
        Ok(self)
    }

    /// Interval actually used between polls, floored at [`MIN_POLL_INTERVAL`]
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn classifier(&self) -> &StateClassifier {
        &self.classifier
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Per-session bookkeeping used to build terminal results
struct Session<S> {
    started: Instant,
    polls: u32,
    target: StateSet,
    last_state: Option<ResourceState>,
    last_snapshot: Option<S>,
}

impl<S: fmt::Debug> Session<S> {
    fn timed_out(self) -> ConvergenceError<S> {
        let elapsed = self.started.elapsed();
        warn!(
            polls = self.polls,
            elapsed_ms = elapsed.as_millis() as u64,
            "Convergence timed out"
        );
        ConvergenceError::Timeout {
            elapsed,
            target: self.target,
            last_state: self.last_state,
            last_snapshot: self.last_snapshot,
        }
    }

    fn cancelled(self) -> ConvergenceError<S> {
        let elapsed = self.started.elapsed();
        info!(polls = self.polls, "Convergence cancelled");
        ConvergenceError::Cancelled {
            elapsed,
            last_snapshot: self.last_snapshot,
        }
    }

    fn failed(self, reason: FailureReason) -> ConvergenceError<S> {
        warn!(polls = self.polls, reason = %reason, "Convergence failed");
        ConvergenceError::Failed {
            reason,
            polls: self.polls,
            last_snapshot: self.last_snapshot,
        }
    }
}

/// Poll `spec`'s probe until the resource converges.
///
/// The first probe call happens immediately. Cancellation is observed
/// before each sleep, during it, and right after waking. The deadline is
/// shared with the probe through [`ProbeContext`]; a probe that ignores it
/// is awaited, not aborted.
pub async fn await_convergence<P>(
    spec: ConvergenceSpec<P>,
    cancel: &CancellationToken,
) -> Result<Converged<P::Snapshot>, ConvergenceError<P::Snapshot>>
where
    P: RefreshProbe,
    P::Snapshot: fmt::Debug,
{
    let span = info_span!("convergence", session = %Uuid::new_v4(), label = %spec.label);
    poll_until_terminal(&spec, cancel).instrument(span).await
}

async fn poll_until_terminal<P>(
    spec: &ConvergenceSpec<P>,
    cancel: &CancellationToken,
) -> Result<Converged<P::Snapshot>, ConvergenceError<P::Snapshot>>
where
    P: RefreshProbe,
    P::Snapshot: fmt::Debug,
{
    let interval = spec.effective_interval();
    let started = Instant::now();
    let deadline = started + spec.timeout.min(MAX_SESSION_SPAN);
    let ctx = ProbeContext::new(cancel.child_token(), deadline);
    let policy = spec.probe.not_found_policy();

    let mut session = Session {
        started,
        polls: 0,
        target: spec.classifier.target().clone(),
        last_state: None,
        last_snapshot: None,
    };
    let mut consecutive_missing = 0u32;

    info!(
        pending = %spec.classifier.pending(),
        target = %spec.classifier.target(),
        interval_ms = interval.as_millis() as u64,
        timeout_secs = spec.timeout.as_secs(),
        "Awaiting convergence"
    );

    loop {
        if cancel.is_cancelled() {
            return Err(session.cancelled());
        }

        session.polls += 1;
        let observed = match spec.probe.refresh(&ctx).await {
            Ok(ProbeOutcome::Observed { snapshot, state }) => {
                consecutive_missing = 0;
                Some((Some(snapshot), state))
            }
            Ok(ProbeOutcome::Missing) => match &policy {
                NotFoundPolicy::Retry { max_consecutive } => {
                    consecutive_missing += 1;
                    if consecutive_missing > *max_consecutive {
                        return Err(session.failed(FailureReason::NotFoundBudgetExhausted(
                            consecutive_missing,
                        )));
                    }
                    debug!(
                        poll = session.polls,
                        consecutive_missing, "Resource not visible yet"
                    );
                    None
                }
                NotFoundPolicy::Fail => return Err(session.failed(FailureReason::NotFound)),
                NotFoundPolicy::TreatAs(state) => Some((None, state.clone())),
            },
            Err(ProbeError::Cancelled) => return Err(session.cancelled()),
            Err(ProbeError::DeadlineExceeded) => return Err(session.timed_out()),
            Err(e) => return Err(session.failed(FailureReason::Probe(e))),
        };

        if let Some((snapshot, state)) = observed {
            match spec.classifier.classify(&state) {
                Classification::Target => {
                    let elapsed = session.started.elapsed();
                    info!(
                        state = %state,
                        polls = session.polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Converged"
                    );
                    return Ok(Converged {
                        snapshot,
                        state,
                        polls: session.polls,
                        elapsed,
                        converged_at: Utc::now(),
                    });
                }
                Classification::Pending => {
                    debug!(poll = session.polls, state = %state, "Still pending");
                    if snapshot.is_some() {
                        session.last_snapshot = snapshot;
                    }
                    session.last_state = Some(state);
                }
                Classification::Unknown => {
                    if snapshot.is_some() {
                        session.last_snapshot = snapshot;
                    }
                    let reason = FailureReason::UnexpectedState {
                        state,
                        pending: spec.classifier.pending().clone(),
                        target: spec.classifier.target().clone(),
                    };
                    return Err(session.failed(reason));
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(session.timed_out());
        }
        if cancel.is_cancelled() {
            return Err(session.cancelled());
        }

        let wake = now.checked_add(interval).map_or(deadline, |w| w.min(deadline));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(session.cancelled()),
            _ = tokio::time::sleep_until(wake) => {}
        }

        if cancel.is_cancelled() {
            return Err(session.cancelled());
        }
        if Instant::now() >= deadline {
            return Err(session.timed_out());
        }
    }
}
