//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, printing is handled by the caller

use std::path::Path;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::AwaitArgs;
use crate::config::{ConfigError, PollSettings, ReconcileConfig};
use crate::convergence::{
    await_convergence, Converged, ConvergenceError, ConvergenceSpec, HttpProbe, RetryingProbe,
    SpecError,
};
use crate::kinds::ResourceKind;
use crate::patch::{plan, PatchPlan, PlanError};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {message}")]
    Document { path: String, message: String },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Invalid convergence spec: {0}")]
    Spec(#[from] SpecError),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Plan Command
// ============================================================================

/// Read a JSON or YAML document; `.yaml`/`.yml` parse as YAML, anything else as JSON
pub fn load_document(path: &Path) -> CommandResult<Value> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let parsed = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| CommandError::Document {
        path: path.display().to_string(),
        message,
    })
}

/// Plan the update from `observed` to `desired` under `kind`'s rules
pub fn plan_documents(
    kind: ResourceKind,
    desired_path: &Path,
    observed_path: &Path,
) -> CommandResult<PatchPlan> {
    let desired = load_document(desired_path)?;
    let observed = load_document(observed_path)?;
    Ok(plan(&desired, &observed, kind.field_rules())?)
}

// ============================================================================
// Await Command
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitOutcome {
    Converged,
    Timeout,
    Failed,
    Cancelled,
}

/// Result of waiting on one URL
#[derive(Debug, Clone, Serialize)]
pub struct AwaitReport {
    pub url: String,
    pub outcome: AwaitOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub polls: Option<u32>,
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

impl AwaitReport {
    pub fn from_result(
        url: &str,
        result: Result<Converged<Value>, ConvergenceError<Value>>,
    ) -> Self {
        match result {
            Ok(converged) => AwaitReport {
                url: url.to_string(),
                outcome: AwaitOutcome::Converged,
                state: Some(converged.state.to_string()),
                polls: Some(converged.polls),
                elapsed_ms: Some(converged.elapsed.as_millis() as u64),
                detail: None,
                snapshot: converged.snapshot,
            },
            Err(err) => {
                let detail = Some(err.to_string());
                match err {
                    ConvergenceError::Timeout {
                        elapsed,
                        last_state,
                        last_snapshot,
                        ..
                    } => AwaitReport {
                        url: url.to_string(),
                        outcome: AwaitOutcome::Timeout,
                        state: last_state.map(|s| s.to_string()),
                        polls: None,
                        elapsed_ms: Some(elapsed.as_millis() as u64),
                        detail,
                        snapshot: last_snapshot,
                    },
                    ConvergenceError::Failed {
                        polls,
                        last_snapshot,
                        ..
                    } => AwaitReport {
                        url: url.to_string(),
                        outcome: AwaitOutcome::Failed,
                        state: None,
                        polls: Some(polls),
                        elapsed_ms: None,
                        detail,
                        snapshot: last_snapshot,
                    },
                    ConvergenceError::Cancelled {
                        elapsed,
                        last_snapshot,
                    } => AwaitReport {
                        url: url.to_string(),
                        outcome: AwaitOutcome::Cancelled,
                        state: None,
                        polls: None,
                        elapsed_ms: Some(elapsed.as_millis() as u64),
                        detail,
                        snapshot: last_snapshot,
                    },
                }
            }
        }
    }
}

/// Settings for an await run: config for the kind, then command-line overrides
pub fn await_settings(config: &ReconcileConfig, args: &AwaitArgs) -> PollSettings {
    let mut settings = config.settings_for(args.kind);
    if let Some(interval_ms) = args.interval_ms {
        settings.interval_ms = interval_ms;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        settings.timeout_secs = timeout_secs;
    }
    settings
}

/// Poll every URL in `args` concurrently until each one finishes
pub async fn run_await(
    args: &AwaitArgs,
    config: &ReconcileConfig,
    cancel: &CancellationToken,
) -> CommandResult<Vec<AwaitReport>> {
    let settings = await_settings(config, args);
    let state_pointer = args
        .state_pointer
        .clone()
        .or_else(|| config.state_pointer.clone());
    let client = reqwest::Client::new();

    let mut specs = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let mut probe = HttpProbe::new(url.as_str())
            .with_client(client.clone())
            .with_bearer_token(args.token.clone())
            .with_not_found_policy(args.operation.not_found_policy(&settings));
        if let Some(ref pointer) = state_pointer {
            probe = probe.with_state_pointer(pointer.as_str());
        }
        let probe = RetryingProbe::new(probe)
            .with_max_attempts(settings.transient_retries)
            .with_delay(settings.retry_delay());

        let spec = ConvergenceSpec::for_kind(args.kind, args.operation, probe, &settings)?
            .with_label(url.as_str());
        specs.push((url.as_str(), spec));
    }

    info!(
        kind = %args.kind,
        operation = %args.operation,
        resources = specs.len(),
        "Waiting for resources"
    );

    let waits = specs.into_iter().map(|(url, spec)| async move {
        AwaitReport::from_result(url, await_convergence(spec, cancel).await)
    });

    Ok(join_all(waits).await)
}

/// Process exit code for a set of await reports.
///
/// 0 when everything converged, 1 on any failure, 2 when the worst outcome
/// was a timeout (polling again may still succeed), 130 when cancelled.
pub fn await_exit_code(reports: &[AwaitReport]) -> i32 {
    let has = |outcome: AwaitOutcome| reports.iter().any(|r| r.outcome == outcome);
    if has(AwaitOutcome::Failed) {
        1
    } else if has(AwaitOutcome::Cancelled) {
        130
    } else if has(AwaitOutcome::Timeout) {
        2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::convergence::{FailureReason, ProbeError, ResourceState, StateSet};
    use crate::kinds::Operation;
    use chrono::Utc;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::Builder;

    fn temp_doc(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn await_args(urls: &[&str]) -> AwaitArgs {
        AwaitArgs {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            kind: ResourceKind::Cluster,
            operation: Operation::Create,
            state_pointer: None,
            token: None,
            interval_ms: None,
            timeout_secs: None,
            output: OutputFormat::Text,
        }
    }

    fn report(outcome: AwaitOutcome) -> AwaitReport {
        AwaitReport {
            url: "http://x".to_string(),
            outcome,
            state: None,
            polls: None,
            elapsed_ms: None,
            detail: None,
            snapshot: None,
        }
    }

    #[test]
    fn test_load_json_and_yaml_documents() {
        let json_file = temp_doc(".json", r#"{"name": "orders"}"#);
        let yaml_file = temp_doc(".yaml", "name: orders\nlabels:\n  env: dev\n");

        assert_eq!(load_document(json_file.path()).unwrap(), json!({"name": "orders"}));
        assert_eq!(
            load_document(yaml_file.path()).unwrap(),
            json!({"name": "orders", "labels": {"env": "dev"}})
        );
    }

    #[test]
    fn test_load_invalid_document() {
        let file = temp_doc(".json", "{not json");
        assert!(matches!(
            load_document(file.path()),
            Err(CommandError::Document { .. })
        ));
    }

    #[test]
    fn test_plan_documents() {
        let desired = temp_doc(".json", r#"{"instance_size": "M20", "region": "us-east-1"}"#);
        let observed = temp_doc(".json", r#"{"instance_size": "M10", "region": "us-east-1"}"#);
        let plan = plan_documents(ResourceKind::Cluster, desired.path(), observed.path()).unwrap();
        assert_eq!(plan.payload, json!({"instance_size": "M20"}));
    }

    #[test]
    fn test_plan_documents_rejected() {
        let desired = temp_doc(".json", r#"{"region": "eu-west-1"}"#);
        let observed = temp_doc(".json", r#"{"region": "us-east-1"}"#);
        let result = plan_documents(ResourceKind::Cluster, desired.path(), observed.path());
        assert!(matches!(result, Err(CommandError::Plan(e)) if e.violations.len() == 1));
    }

    #[test]
    fn test_await_settings_overrides() {
        let config = ReconcileConfig::default();
        let mut args = await_args(&["http://x"]);
        args.interval_ms = Some(1_500);
        let settings = await_settings(&config, &args);
        assert_eq!(settings.interval_ms, 1_500);
        assert_eq!(settings.timeout_secs, config.defaults.timeout_secs);
    }

    #[test]
    fn test_report_from_results() {
        let converged = Converged {
            snapshot: Some(json!({"state": "ACTIVE"})),
            state: ResourceState::new("ACTIVE"),
            polls: 3,
            elapsed: Duration::from_secs(20),
            converged_at: Utc::now(),
        };
        let ok = AwaitReport::from_result("http://a", Ok(converged));
        assert_eq!(ok.outcome, AwaitOutcome::Converged);
        assert_eq!(ok.state.as_deref(), Some("ACTIVE"));
        assert_eq!(ok.elapsed_ms, Some(20_000));

        let timeout = AwaitReport::from_result(
            "http://b",
            Err(ConvergenceError::Timeout {
                elapsed: Duration::from_secs(60),
                target: StateSet::from_iter(["ACTIVE"]),
                last_state: Some(ResourceState::new("CREATING")),
                last_snapshot: None,
            }),
        );
        assert_eq!(timeout.outcome, AwaitOutcome::Timeout);
        assert_eq!(timeout.state.as_deref(), Some("CREATING"));

        let failed = AwaitReport::from_result(
            "http://c",
            Err(ConvergenceError::Failed {
                reason: FailureReason::Probe(ProbeError::Fatal("HTTP 401".to_string())),
                polls: 1,
                last_snapshot: None,
            }),
        );
        assert_eq!(failed.outcome, AwaitOutcome::Failed);
        assert!(failed.detail.unwrap().contains("HTTP 401"));
    }

    #[test]
    fn test_await_exit_code() {
        assert_eq!(await_exit_code(&[report(AwaitOutcome::Converged)]), 0);
        assert_eq!(
            await_exit_code(&[report(AwaitOutcome::Converged), report(AwaitOutcome::Timeout)]),
            2
        );
        assert_eq!(
            await_exit_code(&[report(AwaitOutcome::Timeout), report(AwaitOutcome::Failed)]),
            1
        );
        assert_eq!(await_exit_code(&[report(AwaitOutcome::Cancelled)]), 130);
    }
}
