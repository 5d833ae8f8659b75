//! Stdio to Streamable HTTP proxy
//!
//! [`run`] wires the pieces together: the token manager, the backend
//! client that authenticates every request through it, and the stdio
//! bridge that feeds the backend from the local MCP client.

pub mod backend;
pub mod bridge;
pub mod sse;

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::auth::browser::SystemBrowser;
use crate::auth::{FileTokenStore, OidcAuth, RequestAuthenticator, TokenStore};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

pub use backend::HttpBackend;

/// Runs the proxy on the process's stdin and stdout until stdin closes.
///
/// Provider discovery happens before anything is read from stdin, so a
/// misconfigured issuer stops the proxy immediately. The first token is
/// obtained lazily, on the first request to the backend.
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] for invalid settings or a failed
/// discovery, and [`ProxyError::Io`] if stdin cannot be read.
pub async fn run(config: ProxyConfig) -> Result<()> {
    config.validate()?;

    let store: Arc<dyn TokenStore> = match &config.token_cache_dir {
        Some(dir) => Arc::new(FileTokenStore::new(dir)),
        None => Arc::new(FileTokenStore::in_default_location()?),
    };

    let auth = OidcAuth::connect(&config.oidc, store, Arc::new(SystemBrowser)).await?;

    if config.show_banner {
        eprintln!("{}", banner(&config));
    }

    let endpoint = Url::parse(&config.backend_url).map_err(ProxyError::Url)?;
    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {e}")))?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(HttpBackend::new(
        http,
        endpoint,
        RequestAuthenticator::new(Arc::new(auth)),
        outbound_tx.clone(),
    ));

    tracing::info!(backend = %config.backend_url, "Proxy ready");
    bridge::run(
        backend,
        outbound_tx,
        outbound_rx,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}

/// Startup banner printed to stderr.
pub fn banner(config: &ProxyConfig) -> String {
    let issuer = config.oidc.issuer_url.as_deref().unwrap_or("-");
    format!(
        "authful-mcp-proxy {}\n  backend: {}\n  issuer:  {}",
        env!("CARGO_PKG_VERSION"),
        config.backend_url,
        issuer
    )
}
