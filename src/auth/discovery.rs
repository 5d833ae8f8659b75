//! OpenID Connect provider discovery
//!
//! Resolves the authorization and token endpoints of the configured issuer
//! by fetching `{issuer}/.well-known/openid-configuration` (OpenID Connect
//! Discovery 1.0, section 4).
//!
//! Discovery runs exactly once, while the session is being built. Any
//! failure here is a configuration error and stops the proxy from starting.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProxyError, Result};

/// Timeout applied to every provider HTTP call (discovery, code exchange,
/// refresh).
pub const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

// ---------------------------------------------------------------------------
// ProviderMetadata
// ---------------------------------------------------------------------------

/// The subset of the OIDC discovery document the proxy relies on.
///
/// `authorization_endpoint` and `token_endpoint` are mandatory. Everything
/// else the provider advertises is retained in [`Self::extra`] for
/// reference only.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token"
/// }"#;
/// let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.token_endpoint.as_deref(), Some("https://auth.example.com/token"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// The issuer identifier reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// The URL of the authorization endpoint (RFC 6749 section 3.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// The URL of the token endpoint (RFC 6749 section 3.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Scopes the provider advertises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// PKCE methods the provider advertises (e.g. `["S256"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Additional discovery fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Validated endpoints extracted from [`ProviderMetadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Where the browser is sent to log in.
    pub authorization_endpoint: Url,
    /// Where codes and refresh tokens are exchanged.
    pub token_endpoint: Url,
}

impl ProviderMetadata {
    /// Checks that both required endpoints are present and parse as URLs.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] naming the missing or invalid
    /// endpoint.
    pub fn endpoints(&self) -> Result<ProviderEndpoints> {
        let authorization_endpoint =
            required_endpoint("authorization_endpoint", &self.authorization_endpoint)?;
        let token_endpoint = required_endpoint("token_endpoint", &self.token_endpoint)?;
        Ok(ProviderEndpoints {
            authorization_endpoint,
            token_endpoint,
        })
    }

    /// Returns `true` unless the provider explicitly advertises PKCE methods
    /// that do not include `S256`.
    pub fn advertises_s256(&self) -> bool {
        match &self.code_challenge_methods_supported {
            None => true,
            Some(methods) => methods.iter().any(|m| m == "S256"),
        }
    }
}

fn required_endpoint(name: &str, value: &Option<String>) -> Result<Url> {
    let raw = value
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::Configuration(format!("OIDC configuration missing {name}")))?;
    Url::parse(raw).map_err(|e| {
        ProxyError::Configuration(format!("OIDC configuration has invalid {name} '{raw}': {e}"))
            .into()
    })
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Builds `{issuer}/.well-known/openid-configuration`.
///
/// Trailing slashes on the issuer are ignored so that both
/// `https://auth.example.com/realms/x` and `https://auth.example.com/realms/x/`
/// resolve to the same document.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::discovery::discovery_url;
///
/// let url = discovery_url("https://auth.example.com/realms/demo/").unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://auth.example.com/realms/demo/.well-known/openid-configuration"
/// );
/// ```
pub fn discovery_url(issuer: &str) -> Result<Url> {
    let joined = format!("{}/{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH);
    Url::parse(&joined).map_err(|e| {
        ProxyError::Configuration(format!("Invalid issuer URL '{issuer}': {e}")).into()
    })
}

/// Fetches and validates the provider's discovery document.
///
/// Issues a single GET with a fixed [`PROVIDER_REQUEST_TIMEOUT`].
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] when the request fails, the
/// provider answers with a non-success status, the body is not valid JSON,
/// or a required endpoint is missing.
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    issuer: &str,
) -> Result<(ProviderMetadata, ProviderEndpoints)> {
    let url = discovery_url(issuer)?;
    tracing::debug!(url = %url, "Fetching OIDC provider configuration");

    let resp = http
        .get(url.clone())
        .timeout(PROVIDER_REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            ProxyError::Configuration(format!(
                "Failed to fetch OIDC configuration from {url}: {}",
                ProxyError::transport("discovery", e)
            ))
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ProxyError::Configuration(format!(
            "OIDC configuration endpoint {url} returned {status}"
        ))
        .into());
    }

    let metadata: ProviderMetadata = resp.json().await.map_err(|e| {
        ProxyError::Configuration(format!("Failed to parse OIDC configuration from {url}: {e}"))
    })?;

    let endpoints = metadata.endpoints()?;
    if !metadata.advertises_s256() {
        tracing::warn!(
            issuer,
            "Provider does not advertise PKCE S256 support; continuing anyway"
        );
    }

    tracing::debug!(
        authorization_endpoint = %endpoints.authorization_endpoint,
        token_endpoint = %endpoints.token_endpoint,
        "Resolved OIDC provider endpoints"
    );
    Ok((metadata, endpoints))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
