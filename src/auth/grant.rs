//! Token endpoint calls
//!
//! Both the authorization-code exchange and the refresh grant POST an
//! `application/x-www-form-urlencoded` body to the provider's token endpoint
//! and get the same JSON document back. This module owns that round trip.

use serde::Deserialize;
use url::Url;

use crate::auth::discovery::PROVIDER_REQUEST_TIMEOUT;
use crate::auth::token_store::TokenRecord;
use crate::error::{ProxyError, Result};

/// Ordered form body for the token endpoint.
pub type FormBody = Vec<(&'static str, String)>;

/// Which grant a token request carries. Decides the error variant used for
/// a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// `grant_type=authorization_code`
    AuthorizationCode,
    /// `grant_type=refresh_token`
    RefreshToken,
}

impl GrantKind {
    fn label(&self) -> &'static str {
        match self {
            GrantKind::AuthorizationCode => "token exchange",
            GrantKind::RefreshToken => "token refresh",
        }
    }

    fn rejected(&self, message: String) -> ProxyError {
        match self {
            GrantKind::AuthorizationCode => ProxyError::Auth(message),
            GrantKind::RefreshToken => ProxyError::Renewal(message),
        }
    }

    /// A success status with an unusable body. The provider did not refuse
    /// the refresh token, so a refresh failure here is a transport problem.
    fn malformed(&self, message: String) -> ProxyError {
        match self {
            GrantKind::AuthorizationCode => ProxyError::Auth(message),
            GrantKind::RefreshToken => ProxyError::Transport(message),
        }
    }
}

/// Raw JSON response from the token endpoint (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a [`TokenRecord`]. The absolute expiry is
    /// left for the session to stamp.
    fn into_record(self) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            refresh_token: self.refresh_token,
            scope: self.scope,
            expires_at: None,
        }
    }
}

/// POSTs `form` to `token_endpoint` and parses the token response.
///
/// # Errors
///
/// - [`ProxyError::Transport`] when the request cannot be completed
///   (timeout, connection, TLS).
/// - [`ProxyError::Auth`] (code exchange) or [`ProxyError::Renewal`]
///   (refresh) when the provider answers with a non-success status; the
///   message carries the status and body.
/// - For a success status with a body that is not a valid token response,
///   [`ProxyError::Auth`] (code exchange) or [`ProxyError::Transport`]
///   (refresh; the refresh token was not refused).
pub async fn request_tokens(
    http: &reqwest::Client,
    token_endpoint: &Url,
    form: &FormBody,
    kind: GrantKind,
) -> Result<TokenRecord> {
    let resp = http
        .post(token_endpoint.clone())
        .timeout(PROVIDER_REQUEST_TIMEOUT)
        .form(form)
        .send()
        .await
        .map_err(|e| ProxyError::transport(kind.label(), e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(kind
            .rejected(format!(
                "{} failed: token endpoint returned {status}: {body}",
                kind.label()
            ))
            .into());
    }

    let raw: TokenResponse = resp.json().await.map_err(|e| {
        kind.malformed(format!(
            "{} failed: invalid token response: {e}",
            kind.label()
        ))
    })?;

    if raw.access_token.is_empty() {
        return Err(kind
            .malformed(format!(
                "{} failed: token response has an empty access_token",
                kind.label()
            ))
            .into());
    }

    Ok(raw.into_record())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_minimal() {
        let raw: TokenResponse = serde_json::from_str(r#"{"access_token":"AT2","expires_in":3600}"#)
            .unwrap();
        let record = raw.into_record();
        assert_eq!(record.access_token, "AT2");
        assert_eq!(record.token_type, "Bearer");
        assert_eq!(record.expires_in, Some(3600));
        assert!(record.refresh_token.is_none());
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn test_token_response_full() {
        let raw: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "AT1",
                "token_type": "bearer",
                "expires_in": 300,
                "refresh_token": "RT1",
                "scope": "openid profile",
                "id_token": "ignored"
            }"#,
        )
        .unwrap();
        let record = raw.into_record();
        assert_eq!(record.token_type, "bearer");
        assert_eq!(record.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(record.scope.as_deref(), Some("openid profile"));
    }

    #[test]
    fn test_rejected_maps_to_grant_specific_variant() {
        assert!(matches!(
            GrantKind::AuthorizationCode.rejected("x".into()),
            ProxyError::Auth(_)
        ));
        assert!(matches!(
            GrantKind::RefreshToken.rejected("x".into()),
            ProxyError::Renewal(_)
        ));
    }

    #[test]
    fn test_malformed_refresh_response_is_not_a_rejection() {
        assert!(matches!(
            GrantKind::AuthorizationCode.malformed("x".into()),
            ProxyError::Auth(_)
        ));
        assert!(matches!(
            GrantKind::RefreshToken.malformed("x".into()),
            ProxyError::Transport(_)
        ));
    }
}
