//! Streamable HTTP client for the backend MCP server
//!
//! Every JSON-RPC message from the local client is sent as one POST to the
//! backend endpoint, authenticated through [`RequestAuthenticator`]. The
//! backend may answer with:
//!
//! - `application/json`: one message in the body
//! - `text/event-stream`: any number of messages, see [`crate::proxy::sse`]
//! - `202 Accepted`: nothing (notifications and client responses)
//!
//! # Session management
//!
//! An `MCP-Session-Id` returned by the backend is attached to every later
//! POST. A `404` while a session is active means the backend dropped it;
//! the id is cleared and the request fails.
//!
//! # Protocol version header
//!
//! Once an `initialize` result has been seen, its `protocolVersion` is sent
//! as `MCP-Protocol-Version` on every later POST.

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::auth::RequestAuthenticator;
use crate::error::{ProxyError, Result};
use crate::proxy::sse::forward_sse_stream;

const SESSION_ID_HEADER: &str = "MCP-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Backend connection shared by all in-flight requests.
#[derive(Debug)]
pub struct HttpBackend {
    http: Client,
    endpoint: Url,
    authenticator: RequestAuthenticator,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl HttpBackend {
    /// Creates a backend client. Messages received from the backend are
    /// pushed to `outbound`.
    pub fn new(
        http: Client,
        endpoint: Url,
        authenticator: RequestAuthenticator,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            authenticator,
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
            outbound,
        }
    }

    /// The backend endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The active MCP session id, if the backend assigned one.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// The negotiated protocol version, once known.
    pub async fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().await.clone()
    }

    /// Posts one JSON-RPC message and forwards whatever comes back.
    ///
    /// For an SSE answer this returns once the stream ends.
    ///
    /// # Errors
    ///
    /// - Authentication failures from the renewal engine.
    /// - [`ProxyError::Auth`] if the backend still answers `401` after the
    ///   retry.
    /// - [`ProxyError::Transport`] for network failures, an expired session
    ///   (`404`), or any other non-success status.
    pub async fn send(&self, message: String) -> Result<()> {
        let request = self.build_request(message).await?;
        let response = self.authenticator.send(&self.http, request).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ProxyError::Auth(
                "backend rejected the access token (401 Unauthorized)".to_string(),
            )
            .into());
        }

        if status == StatusCode::NOT_FOUND {
            let mut session_id = self.session_id.write().await;
            if session_id.take().is_some() {
                tracing::warn!("Backend MCP session expired");
                return Err(ProxyError::Transport("MCP session expired".to_string()).into());
            }
            return Err(ProxyError::Transport(format!(
                "backend returned 404 Not Found for {}",
                self.endpoint
            ))
            .into());
        }

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ProxyError::Transport(format!("backend returned {status}: {body}")).into(),
            );
        }

        if let Some(new_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut session_id = self.session_id.write().await;
            if session_id.as_deref() != Some(new_id) {
                tracing::debug!(session_id = new_id, "Backend assigned MCP session");
                *session_id = Some(new_id.to_string());
            }
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_event_stream {
            let mut negotiated = None;
            let count = forward_sse_stream(response.bytes_stream(), &self.outbound, |msg| {
                if let Some(version) = initialize_protocol_version(msg) {
                    negotiated = Some(version);
                }
            })
            .await;
            tracing::debug!(messages = count, "Backend event stream finished");
            if let Some(version) = negotiated {
                self.set_protocol_version(version).await;
            }
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| ProxyError::transport("reading backend response", e))?;
            let body = body.trim();
            if !body.is_empty() {
                if let Some(version) = initialize_protocol_version(body) {
                    self.set_protocol_version(version).await;
                }
                let _ = self.outbound.send(body.to_string());
            }
        }

        Ok(())
    }

    /// Ends the backend session with a `DELETE`, if one is active.
    ///
    /// Failures are logged; the backend will expire the session anyway.
    pub async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let request = match self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_ID_HEADER, session_id.as_str())
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Could not build session DELETE");
                return;
            }
        };
        match self.authenticator.send(&self.http, request).await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Backend MCP session closed")
            }
            Err(e) => tracing::debug!(error = %e, "Failed to close backend MCP session"),
        }
    }

    async fn build_request(&self, message: String) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(
                ACCEPT,
                HeaderValue::from_static("application/json, text/event-stream"),
            );
        if let Some(id) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        if let Some(version) = self.protocol_version.read().await.as_deref() {
            builder = builder.header(PROTOCOL_VERSION_HEADER, version);
        }
        let request = builder
            .body(message)
            .build()
            .map_err(|e| ProxyError::Transport(format!("invalid backend request: {e}")))?;
        Ok(request)
    }

    async fn set_protocol_version(&self, version: String) {
        let mut current = self.protocol_version.write().await;
        if current.as_deref() != Some(version.as_str()) {
            tracing::debug!(version = %version, "Negotiated MCP protocol version");
            *current = Some(version);
        }
    }
}

/// Extracts `result.protocolVersion` from an `initialize` response.
pub fn initialize_protocol_version(message: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    value
        .get("result")?
        .get("protocolVersion")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_protocol_version_found() {
        let msg = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}"#;
        assert_eq!(
            initialize_protocol_version(msg).as_deref(),
            Some("2025-06-18")
        );
    }

    #[test]
    fn test_initialize_protocol_version_absent() {
        assert!(initialize_protocol_version(r#"{"jsonrpc":"2.0","id":2,"result":{}}"#).is_none());
        assert!(initialize_protocol_version("not json").is_none());
    }

    // Request/response handling against wiremock is in tests/proxy_backend_test.rs
}
