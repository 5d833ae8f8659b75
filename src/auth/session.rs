//! OIDC session state
//!
//! [`OidcSession`] holds the immutable [`SessionParams`], the endpoints
//! resolved by discovery, and the current [`TokenRecord`]. Every operation
//! here is synchronous and free of I/O; the renewal engine in
//! [`crate::auth::manager`] decides when to call them.
//!
//! Time-dependent operations come in pairs: `is_valid()` reads the system
//! clock, `is_valid_at(now)` takes the instant explicitly.

use chrono::{DateTime, TimeDelta, Utc};
use url::{Host, Url};

use crate::auth::discovery::ProviderEndpoints;
use crate::auth::grant::FormBody;
use crate::auth::pkce::PkceChallenge;
use crate::auth::token_store::TokenRecord;
use crate::config::OidcConfig;
use crate::error::{ProxyError, Result};

/// A token is treated as expired this long before its real expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Port used when the redirect URL does not name one.
const DEFAULT_REDIRECT_PORT: u16 = 80;

// ---------------------------------------------------------------------------
// SessionParams
// ---------------------------------------------------------------------------

/// Immutable parameters of a session.
#[derive(Clone)]
pub struct SessionParams {
    /// Issuer URL; also the key under which tokens are persisted.
    pub issuer_url: String,
    /// OAuth client identifier.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<String>,
    /// Ordered scopes, always containing `openid`.
    pub scopes: Vec<String>,
    /// Where the provider redirects the browser after login.
    pub redirect_uri: Url,
}

impl std::fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParams")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish()
    }
}

impl SessionParams {
    /// Builds session parameters from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the configuration fails
    /// [`OidcConfig::validate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use authful_mcp_proxy::auth::session::SessionParams;
    /// use authful_mcp_proxy::config::OidcConfig;
    ///
    /// let config = OidcConfig {
    ///     issuer_url: Some("https://auth.example.com".to_string()),
    ///     client_id: Some("test-client".to_string()),
    ///     scopes: Some("profile".to_string()),
    ///     ..Default::default()
    /// };
    /// let params = SessionParams::from_config(&config).unwrap();
    /// assert_eq!(params.scopes, vec!["openid", "profile"]);
    /// assert_eq!(params.redirect_uri.as_str(), "http://localhost:8080/auth/callback");
    /// ```
    pub fn from_config(config: &OidcConfig) -> Result<Self> {
        config.validate()?;

        let issuer_url = config.issuer_url.as_deref().unwrap_or_default().trim();
        let client_id = config.client_id.as_deref().unwrap_or_default().trim();
        let redirect = config.redirect_url_or_default();
        let redirect_uri = Url::parse(redirect).map_err(|e| {
            ProxyError::Configuration(format!("Invalid redirect URL '{redirect}': {e}"))
        })?;

        Ok(Self {
            issuer_url: issuer_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: config
                .client_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            scopes: config.scope_list(),
            redirect_uri,
        })
    }

    /// Scopes joined with single spaces, as sent on the wire.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

// ---------------------------------------------------------------------------
// OidcSession
// ---------------------------------------------------------------------------

/// Session parameters, provider endpoints, and the current token.
#[derive(Debug, Clone)]
pub struct OidcSession {
    params: SessionParams,
    endpoints: ProviderEndpoints,
    tokens: Option<TokenRecord>,
}

impl OidcSession {
    /// Creates a session with no token.
    pub fn new(params: SessionParams, endpoints: ProviderEndpoints) -> Self {
        Self {
            params,
            endpoints,
            tokens: None,
        }
    }

    /// The immutable session parameters.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// The discovered provider endpoints.
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    /// Key used with the token store.
    pub fn issuer_key(&self) -> &str {
        &self.params.issuer_url
    }

    /// Builds the URL the browser is sent to.
    pub fn authorization_url(&self, state: &str, pkce: &PkceChallenge) -> Url {
        let mut url = self.endpoints.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.params.client_id)
            .append_pair("redirect_uri", self.params.redirect_uri.as_str())
            .append_pair("scope", &self.params.scope_string())
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", PkceChallenge::METHOD);
        url
    }

    /// Form body for the authorization-code grant.
    ///
    /// `client_secret` is only present when one is configured.
    pub fn token_exchange_body(&self, code: &str, verifier: &str) -> FormBody {
        let mut form: FormBody = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.params.redirect_uri.to_string()),
            ("client_id", self.params.client_id.clone()),
            ("code_verifier", verifier.to_string()),
        ];
        self.append_client_secret(&mut form);
        form
    }

    /// Form body for the refresh grant.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Renewal`] when no refresh token is held.
    pub fn token_refresh_body(&self) -> Result<FormBody> {
        let refresh_token = self
            .tokens
            .as_ref()
            .and_then(TokenRecord::usable_refresh_token)
            .ok_or_else(|| ProxyError::Renewal("no refresh token available".to_string()))?;

        let mut form: FormBody = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.params.client_id.clone()),
        ];
        self.append_client_secret(&mut form);
        Ok(form)
    }

    fn append_client_secret(&self, form: &mut FormBody) {
        if let Some(secret) = &self.params.client_secret {
            form.push(("client_secret", secret.clone()));
        }
    }

    /// Stores a freshly issued record, stamping its expiry from the clock.
    pub fn set_tokens(&mut self, record: TokenRecord) -> &TokenRecord {
        self.set_tokens_at(record, Utc::now())
    }

    /// Stores a freshly issued record as if issued at `now`.
    ///
    /// A record without a refresh token inherits the one currently held.
    pub fn set_tokens_at(&mut self, mut record: TokenRecord, now: DateTime<Utc>) -> &TokenRecord {
        if record.usable_refresh_token().is_none() {
            if let Some(previous) = self
                .tokens
                .as_ref()
                .and_then(TokenRecord::usable_refresh_token)
            {
                record.refresh_token = Some(previous.to_string());
            }
        }
        record.expires_at = absolute_expiry(record.expires_in, now);
        self.tokens.insert(record)
    }

    /// Installs a record loaded from the token store.
    ///
    /// A persisted `expires_at` is kept; a record that only carries
    /// `expires_in` is treated as issued now.
    pub fn restore_tokens_at(&mut self, mut record: TokenRecord, now: DateTime<Utc>) {
        if record.expires_at.is_none() {
            record.expires_at = absolute_expiry(record.expires_in, now);
        }
        self.tokens = Some(record);
    }

    /// Whether the access token can be used right now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the access token can be used at `now`: present, and either
    /// without expiry or more than [`EXPIRY_MARGIN_SECS`] away from it.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let Some(record) = &self.tokens else {
            return false;
        };
        if record.access_token.is_empty() {
            return false;
        }
        let Some(expires_at) = record.expires_at else {
            return true;
        };
        // An expiry too close to the representable minimum counts as expired.
        expires_at
            .checked_sub_signed(TimeDelta::seconds(EXPIRY_MARGIN_SECS))
            .is_some_and(|deadline| now < deadline)
    }

    /// Whether a refresh grant can be attempted.
    pub fn can_refresh(&self) -> bool {
        self.tokens
            .as_ref()
            .and_then(TokenRecord::usable_refresh_token)
            .is_some()
    }

    /// Drops the current token.
    pub fn clear_tokens(&mut self) {
        self.tokens = None;
    }

    /// The current token record, if any.
    pub fn current_tokens(&self) -> Option<&TokenRecord> {
        self.tokens.as_ref()
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    /// Port of the redirect URI; 80 when none is given.
    pub fn redirect_port(&self) -> u16 {
        self.params
            .redirect_uri
            .port()
            .unwrap_or(DEFAULT_REDIRECT_PORT)
    }

    /// Path of the redirect URI; `/` when empty.
    pub fn redirect_path(&self) -> &str {
        match self.params.redirect_uri.path() {
            "" => "/",
            path => path,
        }
    }

    /// Host of the redirect URI in a form a listener can bind: IPv6
    /// addresses come without brackets.
    pub fn redirect_host(&self) -> String {
        match self.params.redirect_uri.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => "localhost".to_string(),
        }
    }
}

fn absolute_expiry(expires_in: Option<u64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in?).ok()?;
    TimeDelta::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
