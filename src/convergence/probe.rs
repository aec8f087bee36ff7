//! Refresh probes: the one capability the poller consumes
//!
//! A probe reads the current state of one remote resource. It owns every
//! transport concern (status codes, retries on flaky connections, turning a
//! read-after-write 404 into "not there yet") so the poller stays
//! transport-agnostic.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::state::ResourceState;
use super::{DEFAULT_NOT_FOUND_CHECKS, DEFAULT_PROBE_RETRY_BUDGET};

/// Errors a refresh probe may surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Retryable failure (connection reset, 5xx, throttling)
    #[error("Transient probe failure: {0}")]
    Transient(String),

    #[error("Resource '{0}' not found")]
    NotFound(String),

    #[error("Probe failed: {0}")]
    Fatal(String),

    #[error("Malformed probe response: {0}")]
    Malformed(String),

    #[error("Probe gave up after {attempts} attempts: {last}")]
    RetryBudgetExhausted { attempts: u32, last: Box<ProbeError> },

    #[error("Probe cancelled")]
    Cancelled,

    #[error("Probe deadline exceeded")]
    DeadlineExceeded,
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Transient(_))
    }
}

/// Result of one successful refresh call
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome<S> {
    /// The resource is not visible (yet). Retryable, subject to the probe's
    /// [`NotFoundPolicy`].
    Missing,
    /// A full read of the resource and the state tag it reports
    Observed { snapshot: S, state: ResourceState },
}

impl<S> ProbeOutcome<S> {
    pub fn observed(snapshot: S, state: impl Into<ResourceState>) -> Self {
        ProbeOutcome::Observed {
            snapshot,
            state: state.into(),
        }
    }
}

/// What a probe wants done when the resource cannot be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// Keep polling; tolerate up to this many consecutive misses
    Retry { max_consecutive: u32 },
    /// The first miss is fatal
    Fail,
    /// Report a miss as this state (e.g. `DELETED` while waiting on a delete)
    TreatAs(ResourceState),
}

impl Default for NotFoundPolicy {
    fn default() -> Self {
        NotFoundPolicy::Retry {
            max_consecutive: DEFAULT_NOT_FOUND_CHECKS,
        }
    }
}

/// Deadline and cancellation shared by every probe call of one polling session
#[derive(Debug, Clone)]
pub struct ProbeContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl ProbeContext {
    pub fn new(cancel: CancellationToken, deadline: Instant) -> Self {
        Self { cancel, deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the session deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` bounded by this context.
    ///
    /// Returns [`ProbeError::Cancelled`] or [`ProbeError::DeadlineExceeded`]
    /// as soon as either fires, dropping `fut`.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ProbeError>
    where
        F: Future<Output = Result<T, ProbeError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ProbeError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `duration`, waking early on cancellation or deadline
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProbeError> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Reads the current state of one remote resource.
///
/// Implementations must be idempotent and side-effect-free from the caller's
/// point of view, and should bound their own I/O by the context
/// (see [`ProbeContext::guard`]).
#[async_trait]
pub trait RefreshProbe: Send + Sync {
    type Snapshot: Send;

    async fn refresh(
        &self,
        ctx: &ProbeContext,
    ) -> Result<ProbeOutcome<Self::Snapshot>, ProbeError>;

    fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::default()
    }
}

// ============================================================================
// Closure-backed probe
// ============================================================================

/// A probe built from an async closure
pub struct FnProbe<F, S> {
    f: F,
    policy: NotFoundPolicy,
    _snapshot: PhantomData<fn() -> S>,
}

/// Wrap an async closure as a [`RefreshProbe`]
pub fn probe_fn<F, Fut, S>(f: F) -> FnProbe<F, S>
where
    F: Fn(ProbeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeOutcome<S>, ProbeError>> + Send + 'static,
    S: Send + 'static,
{
    FnProbe {
        f,
        policy: NotFoundPolicy::default(),
        _snapshot: PhantomData,
    }
}

impl<F, S> FnProbe<F, S> {
    pub fn with_not_found_policy(mut self, policy: NotFoundPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl<F, Fut, S> RefreshProbe for FnProbe<F, S>
where
    F: Fn(ProbeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeOutcome<S>, ProbeError>> + Send + 'static,
    S: Send + 'static,
{
    type Snapshot = S;

    async fn refresh(&self, ctx: &ProbeContext) -> Result<ProbeOutcome<S>, ProbeError> {
        (self.f)(ctx.clone()).await
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        self.policy.clone()
    }
}

// ============================================================================
// Bounded retry of transient failures
// ============================================================================

/// Retries [`ProbeError::Transient`] inside a single refresh call.
///
/// The budget is bounded so a permanently broken probe surfaces as a failure
/// instead of being masked as a convergence timeout.
pub struct RetryingProbe<P> {
    inner: P,
    max_attempts: u32,
    delay: Duration,
}

impl<P> RetryingProbe<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_PROBE_RETRY_BUDGET,
            delay: Duration::from_millis(500),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: RefreshProbe> RefreshProbe for RetryingProbe<P> {
    type Snapshot = P::Snapshot;

    async fn refresh(
        &self,
        ctx: &ProbeContext,
    ) -> Result<ProbeOutcome<Self::Snapshot>, ProbeError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.inner.refresh(ctx).await {
                Err(e) if e.is_transient() => {
                    if attempt >= self.max_attempts {
                        error!(
                            attempt = attempt,
                            error = %e,
                            "Refresh failed after max retries"
                        );
                        return Err(ProbeError::RetryBudgetExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    warn!(
                        attempt = attempt,
                        error = %e,
                        delay_ms = self.delay.as_millis() as u64,
                        "Refresh failed, retrying"
                    );
                    ctx.sleep(self.delay).await?;
                }
                other => return other,
            }
        }
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        self.inner.not_found_policy()
    }
}

// ============================================================================
// Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::ScriptedProbe;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn context(timeout: Duration) -> ProbeContext {
        ProbeContext::new(CancellationToken::new(), Instant::now() + timeout)
    }

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = probe_fn(|_ctx| async { Ok(ProbeOutcome::observed("snap", "ACTIVE")) });
        let outcome = probe.refresh(&context(Duration::from_secs(1))).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::observed("snap", "ACTIVE"));
        assert_eq!(probe.not_found_policy(), NotFoundPolicy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_deadline() {
        let ctx = context(Duration::from_secs(1));
        let result: Result<(), ProbeError> = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ProbeError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_cancelled() {
        let ctx = context(Duration::from_secs(60));
        ctx.cancellation().cancel();
        let result = ctx.sleep(Duration::from_secs(5)).await;
        assert_eq!(result, Err(ProbeError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_probe_recovers() {
        let probe = ScriptedProbe::new(vec![
            Err(ProbeError::Transient("connection reset".into())),
            Err(ProbeError::Transient("503".into())),
            Ok(Some("ACTIVE".into())),
        ]);
        let counter = probe.counter();
        let retrying = RetryingProbe::new(probe).with_delay(Duration::from_millis(10));

        let outcome = retrying.refresh(&context(Duration::from_secs(5))).await;
        tokio_test::assert_ok!(outcome);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_probe_budget_exhausted() {
        let probe = ScriptedProbe::new(vec![Err(ProbeError::Transient("503".into()))]);
        let counter = probe.counter();
        let retrying = RetryingProbe::new(probe)
            .with_max_attempts(4)
            .with_delay(Duration::from_millis(10));

        let err = retrying
            .refresh(&context(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::RetryBudgetExhausted { attempts: 4, .. }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_probe_passes_fatal_through() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let probe = probe_fn(move |_ctx| {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err::<ProbeOutcome<()>, _>(ProbeError::Fatal("403 forbidden".into()))
            }
        });

        let err = RetryingProbe::new(probe)
            .refresh(&context(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Fatal("403 forbidden".into()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_probe_respects_deadline() {
        let probe = ScriptedProbe::new(vec![Err(ProbeError::Transient("503".into()))]);
        let retrying = RetryingProbe::new(probe).with_delay(Duration::from_secs(10));

        let err = retrying
            .refresh(&context(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::DeadlineExceeded);
    }
}
