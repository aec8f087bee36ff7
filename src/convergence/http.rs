//! HTTP refresh probe
//!
//! GETs a resource URL, reads the state tag out of the JSON body with a JSON
//! pointer and maps status codes onto probe outcomes. This is the only place
//! in the crate that looks at transport status codes.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::trace;

use super::probe::{NotFoundPolicy, ProbeContext, ProbeError, ProbeOutcome, RefreshProbe};
use super::state::ResourceState;

/// Default JSON pointer for the state tag
pub const DEFAULT_STATE_POINTER: &str = "/state";

/// How a response status is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    /// Throttling, request timeouts and server errors
    Transient,
    Fatal,
}

// ============================================================================
// SBIO: Pure response handling (no I/O)
// ============================================================================

/// Sort an HTTP status code into a [`StatusClass`]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        408 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Fatal,
    }
}

/// Read the state tag at `pointer`.
///
/// An empty tag means the resource exists but has not reported a state yet;
/// it is returned as `None` and treated like a miss.
pub fn extract_state(body: &Value, pointer: &str) -> Result<Option<ResourceState>, ProbeError> {
    match body.pointer(pointer) {
        Some(Value::String(tag)) if tag.is_empty() => Ok(None),
        Some(Value::String(tag)) => Ok(Some(ResourceState::new(tag.as_str()))),
        Some(other) => Err(ProbeError::Malformed(format!(
            "state at '{}' is not a string: {}",
            pointer, other
        ))),
        None => Err(ProbeError::Malformed(format!(
            "no state at '{}'",
            pointer
        ))),
    }
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

/// Refresh probe backed by a plain HTTP GET
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
    state_pointer: String,
    bearer_token: Option<String>,
    not_found: NotFoundPolicy,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            state_pointer: DEFAULT_STATE_POINTER.to_string(),
            bearer_token: None,
            not_found: NotFoundPolicy::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_state_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.state_pointer = pointer.into();
        self
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_not_found_policy(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<ProbeOutcome<Value>, ProbeError> {
        let mut request = self.client.get(&self.url);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                ProbeError::Fatal(e.to_string())
            } else {
                ProbeError::Transient(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        trace!(url = %self.url, status, "Probe response");

        match classify_status(status) {
            StatusClass::Success => {}
            StatusClass::NotFound => {
                return match self.not_found {
                    NotFoundPolicy::Fail => Err(ProbeError::NotFound(self.url.clone())),
                    _ => Ok(ProbeOutcome::Missing),
                };
            }
            StatusClass::Transient => {
                return Err(ProbeError::Transient(format!("HTTP {}", status)));
            }
            StatusClass::Fatal => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProbeError::Fatal(format!("HTTP {}: {}", status, body)));
            }
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Malformed(e.to_string()))?;

        match extract_state(&body, &self.state_pointer)? {
            Some(state) => Ok(ProbeOutcome::Observed {
                snapshot: body,
                state,
            }),
            None => Ok(ProbeOutcome::Missing),
        }
    }
}

#[async_trait]
impl RefreshProbe for HttpProbe {
    type Snapshot = Value;

    async fn refresh(&self, ctx: &ProbeContext) -> Result<ProbeOutcome<Value>, ProbeError> {
        ctx.guard(self.fetch()).await
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        self.not_found.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(404), StatusClass::NotFound);
        assert_eq!(classify_status(429), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(401), StatusClass::Fatal);
        assert_eq!(classify_status(409), StatusClass::Fatal);
    }

    #[test]
    fn test_extract_state() {
        let body = json!({"id": "c-1", "status": {"phase": "ACTIVE"}});
        assert_eq!(
            extract_state(&body, "/status/phase").unwrap(),
            Some(ResourceState::new("ACTIVE"))
        );
    }

    #[test]
    fn test_extract_empty_state_is_missing() {
        let body = json!({"state": ""});
        assert_eq!(extract_state(&body, "/state").unwrap(), None);
    }

    #[test]
    fn test_extract_state_malformed() {
        let body = json!({"state": 3});
        assert!(matches!(
            extract_state(&body, "/state"),
            Err(ProbeError::Malformed(_))
        ));
        assert!(matches!(
            extract_state(&body, "/status"),
            Err(ProbeError::Malformed(_))
        ));
    }

    #[test]
    fn test_builder() {
        let probe = HttpProbe::new("http://localhost:1/clusters/a")
            .with_state_pointer("/status/phase")
            .with_not_found_policy(NotFoundPolicy::Fail);
        assert_eq!(probe.url(), "http://localhost:1/clusters/a");
        assert_eq!(probe.state_pointer, "/status/phase");
        assert_eq!(probe.not_found_policy(), NotFoundPolicy::Fail);
    }
}
