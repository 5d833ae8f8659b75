//! Authful MCP Proxy - stdio MCP proxy for OIDC-protected servers
//!
//! This library lets a local MCP client that only speaks stdio talk to a
//! remote Streamable HTTP MCP server that requires OIDC bearer tokens. It
//! obtains, caches, refreshes and attaches the tokens.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: OIDC discovery, authorization-code login with PKCE, token
//!   renewal and the per-request authenticator
//! - `proxy`: Streamable HTTP backend client and the stdio bridge
//! - `config`: Configuration types and validation
//! - `cli`: Command-line interface definition
//! - `logging`: stderr tracing setup
//! - `error`: Error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use authful_mcp_proxy::config::{OidcConfig, ProxyConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProxyConfig {
//!         backend_url: "https://mcp.example.com/mcp".to_string(),
//!         oidc: OidcConfig {
//!             issuer_url: Some("https://auth.example.com".to_string()),
//!             client_id: Some("my-client".to_string()),
//!             ..Default::default()
//!         },
//!         show_banner: false,
//!         log_level: Default::default(),
//!         token_cache_dir: None,
//!     };
//!     authful_mcp_proxy::proxy::run(config).await
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;

// Re-export commonly used types
pub use auth::{OidcAuth, RequestAuthenticator};
pub use config::{OidcConfig, ProxyConfig};
pub use error::{ProxyError, Result};
