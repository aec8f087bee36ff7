//! Integration tests for the HTTP refresh probe
//!
//! Each test starts a thin HTTP server that replays a scripted sequence of
//! responses for a single resource URL, then drives the poller against it.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use reconcile::config::PollSettings;
use reconcile::convergence::{
    await_convergence, ConvergenceError, ConvergenceSpec, FailureReason, HttpProbe,
    NotFoundPolicy, ProbeError, RetryingProbe,
};
use reconcile::kinds::{Operation, ResourceKind};

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

#[derive(Clone)]
struct ScriptState {
    script: Arc<Vec<(u16, Value)>>,
    calls: Arc<AtomicUsize>,
    token: Option<String>,
}

/// Replays the script; the last entry repeats forever
async fn resource_handler(
    State(state): State<ScriptState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);

    if let Some(ref token) = state.token {
        let expected = format!("Bearer {}", token);
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "bad token"})),
            );
        }
    }

    let (status, body) = state.script[call.min(state.script.len() - 1)].clone();
    (StatusCode::from_u16(status).unwrap(), Json(body))
}

/// Start a scripted resource server; returns its URL and call counter
async fn start_resource_server(
    script: Vec<(u16, Value)>,
    token: Option<&str>,
) -> (String, Arc<AtomicUsize>) {
    let port = find_available_port();
    let calls = Arc::new(AtomicUsize::new(0));
    let state = ScriptState {
        script: Arc::new(script),
        calls: calls.clone(),
        token: token.map(String::from),
    };

    let app = Router::new()
        .route("/resource", get(resource_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind resource server");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    sleep(Duration::from_millis(50)).await;
    (format!("http://127.0.0.1:{}/resource", port), calls)
}

fn state(tag: &str) -> (u16, Value) {
    (200, json!({"id": "c-1", "name": "orders", "state": tag}))
}

fn status(code: u16) -> (u16, Value) {
    (code, json!({"error": format!("status {}", code)}))
}

fn fast_settings() -> PollSettings {
    PollSettings {
        interval_ms: 500,
        timeout_secs: 10,
        ..PollSettings::default()
    }
}

#[tokio::test]
async fn test_converges_after_pending_states() {
    let (url, calls) =
        start_resource_server(vec![state("CREATING"), state("CREATING"), state("ACTIVE")], None)
            .await;

    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        HttpProbe::new(url),
        &fast_settings(),
    )
    .unwrap();

    let converged = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(converged.state.as_str(), "ACTIVE");
    assert_eq!(converged.polls, 3);
    assert_eq!(converged.snapshot.unwrap()["id"], json!("c-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_not_found_then_found() {
    let (url, _) =
        start_resource_server(vec![status(404), status(404), state("ACTIVE")], None).await;

    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        HttpProbe::new(url),
        &fast_settings(),
    )
    .unwrap();

    let converged = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(converged.polls, 3);
}

#[tokio::test]
async fn test_transient_errors_retried_within_one_poll() {
    let (url, calls) =
        start_resource_server(vec![status(500), status(503), state("ACTIVE")], None).await;

    let probe = RetryingProbe::new(HttpProbe::new(url)).with_delay(Duration::from_millis(10));
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        probe,
        &fast_settings(),
    )
    .unwrap();

    let converged = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(converged.polls, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_budget_exhausted_fails() {
    let (url, calls) = start_resource_server(vec![status(503)], None).await;

    let probe = RetryingProbe::new(HttpProbe::new(url))
        .with_max_attempts(3)
        .with_delay(Duration::from_millis(10));
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        probe,
        &fast_settings(),
    )
    .unwrap();

    let err = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvergenceError::Failed {
            reason: FailureReason::Probe(ProbeError::RetryBudgetExhausted { attempts: 3, .. }),
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fail_policy_rejects_first_miss() {
    let (url, calls) = start_resource_server(vec![status(404)], None).await;

    let probe = HttpProbe::new(url).with_not_found_policy(NotFoundPolicy::Fail);
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::NodeGroup,
        Operation::Update,
        probe,
        &fast_settings(),
    )
    .unwrap();

    let err = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvergenceError::Failed {
            reason: FailureReason::Probe(ProbeError::NotFound(_)),
            polls: 1,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fatal_status_fails_without_retry() {
    let (url, calls) = start_resource_server(vec![status(403)], None).await;

    let probe = RetryingProbe::new(HttpProbe::new(url)).with_delay(Duration::from_millis(10));
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Export,
        Operation::Create,
        probe,
        &fast_settings(),
    )
    .unwrap();

    let err = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_failed());
    assert!(err.to_string().contains("403"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_state_pointer_and_token() {
    let body = json!({"id": "pe-1", "status": {"phase": "AVAILABLE"}});
    let (url, _) = start_resource_server(vec![(200, body)], Some("s3cret")).await;

    let probe = HttpProbe::new(url)
        .with_state_pointer("/status/phase")
        .with_bearer_token(Some("s3cret".to_string()));
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::PrivateEndpoint,
        Operation::Create,
        probe,
        &fast_settings(),
    )
    .unwrap();

    let converged = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(converged.state.as_str(), "AVAILABLE");
}

#[tokio::test]
async fn test_missing_token_is_fatal() {
    let (url, _) = start_resource_server(vec![state("ACTIVE")], Some("s3cret")).await;

    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        HttpProbe::new(url),
        &fast_settings(),
    )
    .unwrap();

    let err = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_timeout_keeps_last_snapshot() {
    let (url, _) = start_resource_server(vec![state("PROVISIONING")], None).await;

    let settings = PollSettings {
        interval_ms: 500,
        timeout_secs: 1,
        ..PollSettings::default()
    };
    let spec = ConvergenceSpec::for_kind(
        ResourceKind::Cluster,
        Operation::Create,
        HttpProbe::new(url),
        &settings,
    )
    .unwrap();

    let err = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_retryable());
    let snapshot = err.into_last_snapshot().unwrap();
    assert_eq!(snapshot["state"], json!("PROVISIONING"));
}

#[tokio::test]
async fn test_delete_wait_treats_miss_as_deleted() {
    let (url, _) = start_resource_server(vec![state("DELETING"), status(404)], None).await;

    let settings = fast_settings();
    let probe =
        HttpProbe::new(url).with_not_found_policy(Operation::Delete.not_found_policy(&settings));
    let spec =
        ConvergenceSpec::for_kind(ResourceKind::Cluster, Operation::Delete, probe, &settings)
            .unwrap();

    let converged = await_convergence(spec, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(converged.state.as_str(), "DELETED");
    assert!(converged.snapshot.is_none());
    assert_eq!(converged.polls, 2);
}
