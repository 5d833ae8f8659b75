//! Token renewal engine
//!
//! [`OidcAuth`] owns the session for one issuer and answers a single
//! question for the request pipeline: "give me an access token that is
//! valid right now". It coordinates the token store, the refresh grant and
//! the interactive login:
//!
//! - [`OidcAuth::ensure_valid_token`] returns the cached token when it is
//!   valid, otherwise renews it.
//! - [`OidcAuth::force_renewal`] renews even though the cached token looks
//!   valid; used after the backend rejected it with `401`.
//!
//! Renewal (refresh, then login as fallback) runs under one lock per
//! session. Callers that queue behind an in-flight renewal re-check the
//! token once they get the lock and reuse the fresh one, so N concurrent
//! callers cause one refresh or one browser login, never N.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::auth::browser::BrowserLauncher;
use crate::auth::discovery::{fetch_provider_metadata, ProviderMetadata};
use crate::auth::flow::AuthorizationCodeFlow;
use crate::auth::grant::{request_tokens, GrantKind};
use crate::auth::session::{OidcSession, SessionParams};
use crate::auth::token_store::{TokenRecord, TokenStore};
use crate::config::OidcConfig;
use crate::error::{ProxyError, Result};

// ---------------------------------------------------------------------------
// OidcAuth
// ---------------------------------------------------------------------------

/// Token lifecycle manager for one OIDC issuer.
///
/// Share it behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct OidcAuth {
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    flow: AuthorizationCodeFlow,
    metadata: Option<ProviderMetadata>,
    session: RwLock<OidcSession>,
    renewal: Mutex<()>,
    loaded: OnceCell<()>,
}

impl OidcAuth {
    /// Validates `config`, runs provider discovery and builds the manager.
    ///
    /// Discovery happens here, once. A provider that cannot be reached or
    /// that lacks the required endpoints stops construction.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] for invalid settings or a failed
    /// discovery.
    pub async fn connect(
        config: &OidcConfig,
        store: Arc<dyn TokenStore>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Self::connect_with_client(http, config, store, browser).await
    }

    /// Same as [`connect`](Self::connect) with a caller-supplied HTTP client.
    pub async fn connect_with_client(
        http: reqwest::Client,
        config: &OidcConfig,
        store: Arc<dyn TokenStore>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let params = SessionParams::from_config(config)?;
        let (metadata, endpoints) = fetch_provider_metadata(&http, &params.issuer_url).await?;
        tracing::info!(
            issuer = %params.issuer_url,
            client_id = %params.client_id,
            scopes = %params.scope_string(),
            "OIDC session configured"
        );

        let flow = AuthorizationCodeFlow::new(http.clone(), browser);
        let mut auth = Self::from_session(http, OidcSession::new(params, endpoints), store, flow);
        auth.metadata = Some(metadata);
        Ok(auth)
    }

    /// Builds a manager around an existing session without discovery.
    pub fn from_session(
        http: reqwest::Client,
        session: OidcSession,
        store: Arc<dyn TokenStore>,
        flow: AuthorizationCodeFlow,
    ) -> Self {
        Self {
            http,
            store,
            flow,
            metadata: None,
            session: RwLock::new(session),
            renewal: Mutex::new(()),
            loaded: OnceCell::new(),
        }
    }

    /// Replaces the login flow, e.g. to shorten the callback timeout.
    pub fn with_flow(mut self, flow: AuthorizationCodeFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Full discovery document, when built through [`connect`](Self::connect).
    pub fn metadata(&self) -> Option<&ProviderMetadata> {
        self.metadata.as_ref()
    }

    /// A copy of the current session state.
    pub async fn session(&self) -> OidcSession {
        self.session.read().await.clone()
    }

    /// Returns an access token that is valid now.
    ///
    /// 1. Loads the persisted token on first use.
    /// 2. Returns the cached token if it is valid; no network traffic.
    /// 3. Otherwise takes the renewal lock and, unless another caller
    ///    renewed meanwhile, refreshes or falls back to interactive login.
    ///
    /// # Errors
    ///
    /// Only a failure of the interactive login is returned; refresh
    /// failures are logged and recovered by the login.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        self.ensure_loaded().await;

        if let Some(token) = self.valid_access_token().await {
            return Ok(token);
        }

        let _guard = self.renewal.lock().await;
        if let Some(token) = self.valid_access_token().await {
            tracing::debug!("Token renewed by a concurrent caller");
            return Ok(token);
        }
        self.renew_locked().await
    }

    /// Renews the token regardless of its cached expiry.
    ///
    /// `rejected` is the access token the backend just refused. If the
    /// session already holds a different valid token (another request got
    /// there first), that token is returned without renewing again.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_valid_token`](Self::ensure_valid_token).
    pub async fn force_renewal(&self, rejected: &str) -> Result<String> {
        self.ensure_loaded().await;

        let _guard = self.renewal.lock().await;
        {
            let session = self.session.read().await;
            if session.is_valid() {
                if let Some(current) = session.access_token() {
                    if current != rejected {
                        tracing::debug!("Rejected token already replaced");
                        return Ok(current.to_string());
                    }
                }
            }
        }
        tracing::info!("Backend rejected the access token; renewing");
        self.renew_locked().await
    }

    /// Runs the refresh grant now, without falling back to login.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Renewal`] when no refresh token is held or the
    /// provider rejects it, [`ProxyError::Transport`] when the token endpoint
    /// cannot be reached.
    pub async fn refresh(&self) -> Result<String> {
        self.ensure_loaded().await;
        let _guard = self.renewal.lock().await;
        self.refresh_locked().await
    }

    /// Whether the cached token is valid now.
    pub async fn is_valid(&self) -> bool {
        self.session.read().await.is_valid()
    }

    /// Whether the cached token is valid at `now`.
    pub async fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.session.read().await.is_valid_at(now)
    }

    /// Whether a refresh grant can be attempted.
    pub async fn can_refresh(&self) -> bool {
        self.session.read().await.can_refresh()
    }

    /// A copy of the current token record.
    pub async fn current_tokens(&self) -> Option<TokenRecord> {
        self.session.read().await.current_tokens().cloned()
    }

    /// Forgets the token in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the persisted record cannot be removed.
    pub async fn clear_tokens(&self) -> Result<()> {
        let issuer_key = {
            let mut session = self.session.write().await;
            session.clear_tokens();
            session.issuer_key().to_string()
        };
        self.store.clear(&issuer_key).await
    }

    // -----------------------------------------------------------------------
    // Internals; the *_locked methods require the renewal lock.
    // -----------------------------------------------------------------------

    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let issuer_key = self.session.read().await.issuer_key().to_string();
                match self.store.load(&issuer_key).await {
                    Ok(Some(record)) => {
                        tracing::debug!("Loaded cached token");
                        self.session
                            .write()
                            .await
                            .restore_tokens_at(record, Utc::now());
                    }
                    Ok(None) => tracing::debug!("No cached token"),
                    Err(e) => tracing::warn!(error = %e, "Failed to load cached token"),
                }
            })
            .await;
    }

    async fn valid_access_token(&self) -> Option<String> {
        let session = self.session.read().await;
        if session.is_valid() {
            session.access_token().map(str::to_string)
        } else {
            None
        }
    }

    async fn renew_locked(&self) -> Result<String> {
        if self.session.read().await.can_refresh() {
            match self.refresh_locked().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::warn!(error = %e, "Token refresh failed; falling back to login");
                    if matches!(e.downcast_ref::<ProxyError>(), Some(ProxyError::Renewal(_))) {
                        self.discard_rejected_tokens().await;
                    }
                }
            }
        }
        self.login_locked().await
    }

    async fn refresh_locked(&self) -> Result<String> {
        let (form, token_endpoint) = {
            let session = self.session.read().await;
            (
                session.token_refresh_body()?,
                session.endpoints().token_endpoint.clone(),
            )
        };

        tracing::debug!("Refreshing access token");
        let record =
            request_tokens(&self.http, &token_endpoint, &form, GrantKind::RefreshToken).await?;
        let token = self.install(record).await;
        tracing::info!("Access token refreshed");
        Ok(token)
    }

    async fn login_locked(&self) -> Result<String> {
        let snapshot = self.session.read().await.clone();
        let record = self.flow.run(&snapshot).await?;
        Ok(self.install(record).await)
    }

    /// Stores a freshly issued record and persists the merged result.
    async fn install(&self, record: TokenRecord) -> String {
        let (issuer_key, merged) = {
            let mut session = self.session.write().await;
            let merged = session.set_tokens(record).clone();
            (session.issuer_key().to_string(), merged)
        };

        if let Err(e) = self.store.save(&issuer_key, &merged).await {
            tracing::warn!(error = %e, "Failed to persist token; it stays valid for this process");
        }
        merged.access_token
    }

    async fn discard_rejected_tokens(&self) {
        if let Err(e) = self.clear_tokens().await {
            tracing::warn!(error = %e, "Failed to remove rejected token from cache");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
