//! Command-line interface definition for the authful MCP proxy
//!
//! This module defines the CLI structure using clap's derive API. Every
//! OIDC option can also come from its environment variable; a value given
//! on the command line wins.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{LogLevel, OidcConfig, ProxyConfig};
use crate::error::{ProxyError, Result};

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "MCP_PROXY_DEBUG";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &str = "openid profile email";

/// Authful MCP Proxy
///
/// Bridges a local stdio MCP client to a remote HTTP MCP server that
/// requires OIDC bearer tokens.
#[derive(Parser, Debug, Clone)]
#[command(name = "authful-mcp-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// URL of the remote backend MCP server to proxy
    #[arg(value_name = "MCP_BACKEND_URL", env = "MCP_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Don't show the proxy banner
    #[arg(long)]
    pub no_banner: bool,

    /// OIDC issuer URL
    #[arg(long, env = "OIDC_ISSUER_URL")]
    pub oidc_issuer_url: Option<String>,

    /// OAuth client ID
    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    /// OAuth client secret (optional for public clients)
    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub oidc_client_secret: Option<String>,

    /// Space-separated OAuth scopes
    #[arg(long, env = "OIDC_SCOPES", default_value = DEFAULT_SCOPES)]
    pub oidc_scopes: String,

    /// Localhost URL for the OAuth redirect
    /// [default: http://localhost:8080/auth/callback]
    #[arg(long, env = "OIDC_REDIRECT_URL")]
    pub oidc_redirect_url: Option<String>,

    /// Directory for cached tokens [default: platform cache directory]
    #[arg(long, env = "MCP_PROXY_TOKEN_CACHE_DIR")]
    pub token_cache_dir: Option<PathBuf>,

    /// Show only error messages
    #[arg(long, conflicts_with = "debug")]
    pub silent: bool,

    /// Enable debug logging (also enabled by MCP_PROXY_DEBUG)
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log level from `--silent`, `--debug` and `MCP_PROXY_DEBUG`.
    ///
    /// `--silent` wins over the environment variable.
    pub fn log_level(&self) -> LogLevel {
        self.log_level_with(std::env::var(DEBUG_ENV).ok().as_deref())
    }

    /// Same as [`log_level`](Self::log_level) with an explicit value for
    /// `MCP_PROXY_DEBUG`.
    pub fn log_level_with(&self, debug_env: Option<&str>) -> LogLevel {
        if self.silent {
            LogLevel::Error
        } else if self.debug || debug_env.is_some_and(is_truthy) {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    /// Builds the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if no backend URL was given.
    pub fn into_config(self) -> Result<ProxyConfig> {
        let log_level = self.log_level();
        let backend_url = non_empty(self.backend_url).ok_or_else(|| {
            ProxyError::Configuration("Missing required MCP backend URL".to_string())
        })?;

        Ok(ProxyConfig {
            backend_url,
            oidc: OidcConfig {
                issuer_url: non_empty(self.oidc_issuer_url),
                client_id: non_empty(self.oidc_client_id),
                client_secret: non_empty(self.oidc_client_secret),
                scopes: non_empty(Some(self.oidc_scopes)),
                redirect_url: non_empty(self.oidc_redirect_url),
            },
            show_banner: !self.no_banner,
            log_level,
            token_cache_dir: self.token_cache_dir,
        })
    }
}

/// `1`, `true`, `yes` and `on`, case-insensitive.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
