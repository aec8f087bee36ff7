//! Lifecycle driver
//!
//! Composes the planner and the convergence poller over a [`ResourceClient`]:
//! issue the request, then wait until the remote side reports the operation
//! finished.
//!
//! ```text
//! [Absent]  --create-->        [Pending] --target--> [Ready]
//! [Ready]   --update(patch)--> [Pending] --target--> [Ready]
//! [Ready]   --update(empty)--> [Ready]
//! [Any]     --delete-->        [Deleting] --gone--> [Absent]
//! [Pending] --failure-->       [Error]
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::convergence::{
    await_convergence, ConvergenceError, ConvergenceSpec, NotFoundPolicy, ProbeContext,
    ProbeError, ProbeOutcome, RefreshProbe, ResourceState, SpecError,
};
use crate::kinds::{Operation, ResourceKind};
use crate::patch::{plan, PatchPlan, PlanError};

/// Errors reported by a [`ResourceClient`] when issuing a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Capability to issue lifecycle requests for one resource kind
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Issue a create; returns the new resource id
    async fn create(&self, desired: &Value) -> Result<String, ClientError>;

    async fn update(&self, id: &str, plan: &PatchPlan) -> Result<(), ClientError>;

    async fn delete(&self, id: &str) -> Result<(), ClientError>;

    /// Read the resource while waiting on `operation`
    async fn refresh(
        &self,
        id: &str,
        operation: Operation,
        ctx: &ProbeContext,
    ) -> Result<ProbeOutcome<Value>, ProbeError>;

    /// Override how misses are treated while waiting on `operation`
    fn not_found_policy(&self, _operation: Operation) -> Option<NotFoundPolicy> {
        None
    }
}

// ============================================================================
// Phase state machine
// ============================================================================

/// Where a resource instance is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Absent,
    Pending(Operation),
    Ready,
    Deleting,
    /// Terminal; only a delete leaves it
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    CreateIssued,
    UpdateIssued,
    UpdateSkipped,
    DeleteIssued,
    Converged,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid lifecycle transition: {event:?} in phase {from:?}")]
pub struct InvalidTransition {
    pub from: LifecyclePhase,
    pub event: PhaseEvent,
}

impl LifecyclePhase {
    pub fn apply(self, event: PhaseEvent) -> Result<LifecyclePhase, InvalidTransition> {
        use LifecyclePhase::*;
        use PhaseEvent::*;
        match (self, event) {
            (_, DeleteIssued) => Ok(Deleting),
            (Absent, CreateIssued) => Ok(Pending(Operation::Create)),
            (Ready, UpdateIssued) => Ok(Pending(Operation::Update)),
            (Ready, UpdateSkipped) => Ok(Ready),
            (Pending(_), Converged) => Ok(Ready),
            (Deleting, Converged) => Ok(Absent),
            (Pending(_) | Deleting, Failed) => Ok(Error),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Error)
    }
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("{operation} request failed: {source}")]
    Client {
        operation: Operation,
        #[source]
        source: ClientError,
    },

    #[error("{operation} of '{id}' did not converge: {source}")]
    Convergence {
        operation: Operation,
        id: String,
        #[source]
        source: ConvergenceError<Value>,
    },

    #[error("Invalid convergence spec: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl LifecycleError {
    /// Phase the resource is left in
    pub fn phase(&self) -> Option<LifecyclePhase> {
        match self {
            LifecycleError::Convergence { .. } => Some(LifecyclePhase::Error),
            _ => None,
        }
    }
}

/// A resource that reached a stable state
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub phase: LifecyclePhase,
    pub state: ResourceState,
    /// Last read; absent once a delete completed
    pub snapshot: Option<Value>,
    pub polls: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Observed already matched desired; nothing was sent
    Unchanged,
    Applied { plan: PatchPlan, resource: Resource },
}

/// Refresh probe bound to one resource id and operation
struct ClientProbe<C> {
    client: Arc<C>,
    id: String,
    operation: Operation,
    not_found: NotFoundPolicy,
}

#[async_trait]
impl<C: ResourceClient> RefreshProbe for ClientProbe<C> {
    type Snapshot = Value;

    async fn refresh(&self, ctx: &ProbeContext) -> Result<ProbeOutcome<Value>, ProbeError> {
        self.client.refresh(&self.id, self.operation, ctx).await
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        self.not_found.clone()
    }
}

/// Drives create, update and delete for one resource kind
pub struct Lifecycle<C> {
    kind: ResourceKind,
    client: Arc<C>,
    settings: PollSettings,
    cancel: CancellationToken,
}

impl<C: ResourceClient> Lifecycle<C> {
    pub fn new(kind: ResourceKind, client: Arc<C>) -> Self {
        Self {
            kind,
            client,
            settings: PollSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Cancelling this token aborts any wait in progress
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Create the resource and wait until it is ready
    pub async fn create(&self, desired: &Value) -> Result<Resource, LifecycleError> {
        let phase = LifecyclePhase::Absent.apply(PhaseEvent::CreateIssued)?;

        let id = self
            .client
            .create(desired)
            .await
            .map_err(|source| LifecycleError::Client {
                operation: Operation::Create,
                source,
            })?;
        info!(kind = %self.kind, id = %id, "Create issued");

        self.wait(id, Operation::Create, phase).await
    }

    /// Plan against `observed`, send the patch and wait until ready.
    ///
    /// Rule violations and empty plans return before any request is made.
    pub async fn update(
        &self,
        id: &str,
        desired: &Value,
        observed: &Value,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let plan = plan(desired, observed, self.kind.field_rules())?;

        if plan.is_empty() {
            LifecyclePhase::Ready.apply(PhaseEvent::UpdateSkipped)?;
            debug!(kind = %self.kind, id = %id, "No changes to apply");
            return Ok(UpdateOutcome::Unchanged);
        }

        let phase = LifecyclePhase::Ready.apply(PhaseEvent::UpdateIssued)?;
        info!(
            kind = %self.kind,
            id = %id,
            changes = plan.changes.len(),
            fields = ?plan.touched_fields,
            fingerprint = %plan.fingerprint,
            "Applying patch"
        );

        self.client
            .update(id, &plan)
            .await
            .map_err(|source| LifecycleError::Client {
                operation: Operation::Update,
                source,
            })?;

        let resource = self.wait(id.to_string(), Operation::Update, phase).await?;
        Ok(UpdateOutcome::Applied { plan, resource })
    }

    /// Delete the resource; with `wait`, block until it is gone.
    ///
    /// A resource that is already gone counts as deleted.
    pub async fn delete(&self, id: &str, wait: bool) -> Result<LifecyclePhase, LifecycleError> {
        let phase = LifecyclePhase::Ready.apply(PhaseEvent::DeleteIssued)?;

        match self.client.delete(id).await {
            Ok(()) => {}
            Err(ClientError::NotFound(_)) => {
                debug!(kind = %self.kind, id = %id, "Already deleted");
                return Ok(phase.apply(PhaseEvent::Converged)?);
            }
            Err(source) => {
                return Err(LifecycleError::Client {
                    operation: Operation::Delete,
                    source,
                })
            }
        }
        info!(kind = %self.kind, id = %id, "Delete issued");

        if !wait {
            return Ok(phase);
        }

        let resource = self.wait(id.to_string(), Operation::Delete, phase).await?;
        Ok(resource.phase)
    }

    async fn wait(
        &self,
        id: String,
        operation: Operation,
        phase: LifecyclePhase,
    ) -> Result<Resource, LifecycleError> {
        let not_found = self
            .client
            .not_found_policy(operation)
            .unwrap_or_else(|| operation.not_found_policy(&self.settings));

        let probe = ClientProbe {
            client: Arc::clone(&self.client),
            id: id.clone(),
            operation,
            not_found,
        };
        let spec = ConvergenceSpec::for_kind(self.kind, operation, probe, &self.settings)?
            .with_label(format!("{} {} {}", self.kind, operation, id));

        match await_convergence(spec, &self.cancel).await {
            Ok(converged) => Ok(Resource {
                phase: phase.apply(PhaseEvent::Converged)?,
                id,
                state: converged.state,
                snapshot: converged.snapshot,
                polls: converged.polls,
                elapsed: converged.elapsed,
            }),
            Err(source) => {
                let failed = phase.apply(PhaseEvent::Failed)?;
                warn!(
                    kind = %self.kind,
                    id = %id,
                    operation = %operation,
                    phase = ?failed,
                    error = %source,
                    "Resource did not converge"
                );
                Err(LifecycleError::Convergence {
                    operation,
                    id,
                    source,
                })
            }
        }
    }
}

// ============================================================================
// Test utilities
// ============================================================================
