//! Configuration management for the authful MCP proxy
//!
//! This module holds the OIDC and proxy settings resolved by the CLI layer.
//! Nothing here reads environment variables directly; values arrive as
//! explicit fields (or through [`OidcConfig::from_map`]) and are validated
//! before a session is built from them.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProxyError, Result};

/// Redirect URL used when none is configured
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/auth/callback";

/// Scope that is always requested
pub const OPENID_SCOPE: &str = "openid";

/// OIDC authentication configuration
///
/// All fields are optional on input so that partially populated sources
/// (CLI flags, environment, config maps) can be merged before validation.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    /// OIDC issuer URL (e.g. `https://keycloak.example.com/realms/myrealm`)
    #[serde(default)]
    pub issuer_url: Option<String>,

    /// OAuth client identifier
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret; absent for public clients
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Space-separated OAuth scopes
    #[serde(default)]
    pub scopes: Option<String>,

    /// Localhost callback URL for the OAuth redirect
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl std::fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("scopes", &self.scopes)
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

impl OidcConfig {
    /// Builds a configuration from a generic key-value map.
    ///
    /// Only the keys `issuer_url`, `client_id`, `client_secret`, `scopes`
    /// and `redirect_url` are recognised. Unknown keys are dropped, and
    /// empty values are treated as absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use authful_mcp_proxy::config::OidcConfig;
    ///
    /// let mut map = HashMap::new();
    /// map.insert("issuer_url".to_string(), "https://auth.example.com".to_string());
    /// map.insert("client_id".to_string(), "test-client".to_string());
    /// map.insert("colour".to_string(), "blue".to_string());
    ///
    /// let config = OidcConfig::from_map(&map);
    /// assert_eq!(config.client_id.as_deref(), Some("test-client"));
    /// assert!(config.client_secret.is_none());
    /// ```
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        for (key, value) in map {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_str() {
                "issuer_url" => &mut config.issuer_url,
                "client_id" => &mut config.client_id,
                "client_secret" => &mut config.client_secret,
                "scopes" => &mut config.scopes,
                "redirect_url" => &mut config.redirect_url,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        config
    }

    /// Returns the ordered scope list with `openid` guaranteed first.
    ///
    /// When no scopes are configured the list is just `["openid"]`.
    /// Duplicates are removed while keeping first occurrence order.
    ///
    /// # Examples
    ///
    /// ```
    /// use authful_mcp_proxy::config::OidcConfig;
    ///
    /// let config = OidcConfig {
    ///     scopes: Some("profile email".to_string()),
    ///     ..Default::default()
    /// };
    /// assert_eq!(config.scope_list(), vec!["openid", "profile", "email"]);
    /// ```
    pub fn scope_list(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.scopes.as_deref().unwrap_or("").split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        if !scopes.iter().any(|s| s == OPENID_SCOPE) {
            scopes.insert(0, OPENID_SCOPE.to_string());
        }
        scopes
    }

    /// Returns the configured redirect URL or the default one.
    pub fn redirect_url_or_default(&self) -> &str {
        self.redirect_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_REDIRECT_URL)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] when the issuer URL or client id
    /// is missing, when either URL does not parse, or when the redirect URL
    /// is not a plain `http` URL with a host.
    pub fn validate(&self) -> Result<()> {
        let issuer = non_empty(&self.issuer_url)
            .ok_or_else(|| ProxyError::Configuration("Missing required issuer URL".to_string()))?;
        if non_empty(&self.client_id).is_none() {
            return Err(ProxyError::Configuration("Missing required client id".to_string()).into());
        }

        let issuer_url = Url::parse(issuer).map_err(|e| {
            ProxyError::Configuration(format!("Invalid issuer URL '{issuer}': {e}"))
        })?;
        if !matches!(issuer_url.scheme(), "http" | "https") {
            return Err(ProxyError::Configuration(format!(
                "Issuer URL must be http or https: {issuer}"
            ))
            .into());
        }

        let redirect = self.redirect_url_or_default();
        let redirect_url = Url::parse(redirect).map_err(|e| {
            ProxyError::Configuration(format!("Invalid redirect URL '{redirect}': {e}"))
        })?;
        if redirect_url.scheme() != "http" || redirect_url.host_str().is_none() {
            return Err(ProxyError::Configuration(format!(
                "Redirect URL must be a local http URL: {redirect}"
            ))
            .into());
        }

        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Log verbosity selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Normal operation
    #[default]
    Info,
    /// Verbose diagnostics
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Complete proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// URL of the remote backend MCP server
    pub backend_url: String,

    /// OIDC settings used to authenticate against the backend
    pub oidc: OidcConfig,

    /// Print the startup banner to stderr
    #[serde(default = "default_show_banner")]
    pub show_banner: bool,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Override for the token cache directory
    #[serde(default)]
    pub token_cache_dir: Option<PathBuf>,
}

fn default_show_banner() -> bool {
    true
}

impl ProxyConfig {
    /// Validates the backend URL and the OIDC settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] on the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(ProxyError::Configuration(
                "Missing required MCP backend URL".to_string(),
            )
            .into());
        }
        let backend = Url::parse(&self.backend_url).map_err(|e| {
            ProxyError::Configuration(format!(
                "Invalid MCP backend URL '{}': {e}",
                self.backend_url
            ))
        })?;
        if !matches!(backend.scheme(), "http" | "https") {
            return Err(ProxyError::Configuration(format!(
                "MCP backend URL must be http or https: {}",
                self.backend_url
            ))
            .into());
        }
        self.oidc.validate()
    }
}
