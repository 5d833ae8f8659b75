//! Local OAuth redirect listener
//!
//! A short-lived `axum` server bound to the redirect URI's host and port
//! that serves exactly one route: the redirect path. The first request that
//! reaches it resolves the pending wait; the browser gets a small HTML page
//! back.
//!
//! The server task is shut down gracefully once the callback arrives and is
//! aborted when the [`CallbackListener`] is dropped, so a timeout or a
//! cancelled flow never leaves the port bound.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};

/// How long the flow waits for the browser redirect.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period for in-flight responses before the server is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Query parameters of the redirect (RFC 6749 sections 4.1.2 and 4.1.2.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,
    /// Echoed anti-CSRF state
    #[serde(default)]
    pub state: Option<String>,
    /// Provider error code, e.g. `access_denied`
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable provider error
    #[serde(default)]
    pub error_description: Option<String>,
}

type PendingSender = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// A running redirect listener.
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    result: Option<oneshot::Receiver<CallbackParams>>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl CallbackListener {
    /// Binds `host:port` and starts serving `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Auth`] if the address cannot be bound, e.g.
    /// because the port is already in use.
    pub async fn bind(host: &str, port: u16, path: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| {
                ProxyError::Auth(format!(
                    "failed to bind OAuth callback listener on {host}:{port}: {e}"
                ))
            })?;
        let local_addr = listener.local_addr().map_err(ProxyError::Io)?;

        let (result_tx, result_rx) = oneshot::channel::<CallbackParams>();
        let pending: PendingSender = Arc::new(Mutex::new(Some(result_tx)));

        let handler = {
            let pending = pending.clone();
            move |Query(params): Query<CallbackParams>| {
                let pending = pending.clone();
                async move {
                    let page = if params.error.is_some() || params.code.is_none() {
                        FAILURE_HTML
                    } else {
                        SUCCESS_HTML
                    };
                    if let Some(sender) = pending.lock().await.take() {
                        let _ = sender.send(params);
                    }
                    Html(page)
                }
            }
        };
        let app = Router::new().route(path, get(handler));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::warn!(error = %e, "OAuth callback listener stopped with an error");
            }
        });

        tracing::debug!(addr = %local_addr, path, "OAuth callback listener started");
        Ok(Self {
            local_addr,
            result: Some(result_rx),
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits up to `timeout` for the redirect, then stops the listener.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::AuthTimeout`] when nothing arrives in time.
    /// - [`ProxyError::Auth`] if the server stops before a callback arrives.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackParams> {
        let Some(result) = self.result.take() else {
            return Err(ProxyError::Auth("callback already consumed".to_string()).into());
        };

        let outcome = tokio::time::timeout(timeout, result).await;
        self.stop().await;

        match outcome {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(ProxyError::Auth(
                "OAuth callback listener closed unexpectedly".to_string(),
            )
            .into()),
            Err(_) => Err(ProxyError::AuthTimeout {
                seconds: timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server)
            .await
            .is_err()
        {
            self.server.abort();
        }
        tracing::debug!(addr = %self.local_addr, "OAuth callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.server.abort();
    }
}

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Login complete</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
<h1>Login complete</h1>
<p>You can close this window and return to your MCP client.</p>
</body>
</html>"#;

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Login failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
<h1>Login failed</h1>
<p>The identity provider did not return an authorization code. Check the proxy log for details.</p>
</body>
</html>"#;
