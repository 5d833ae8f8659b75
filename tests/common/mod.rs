use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authful_mcp_proxy::auth::browser::BrowserLauncher;
use authful_mcp_proxy::auth::discovery::ProviderEndpoints;
use authful_mcp_proxy::auth::flow::AuthorizationCodeFlow;
use authful_mcp_proxy::auth::session::{OidcSession, SessionParams};
use authful_mcp_proxy::auth::{OidcAuth, TokenStore};
use authful_mcp_proxy::config::OidcConfig;
use authful_mcp_proxy::error::Result;

#[allow(dead_code)]
pub const CLIENT_ID: &str = "test-client";

/// Returns a localhost port that was free a moment ago.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind a free port");
    listener.local_addr().expect("listener has no address").port()
}

/// Discovery document pointing at `/authorize` and `/token` on `base_url`.
#[allow(dead_code)]
pub fn discovery_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{base_url}/authorize"),
        "token_endpoint": format!("{base_url}/token"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    })
}

/// Mounts the discovery document on `server`.
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&server.uri())))
        .mount(server)
        .await;
}

/// OIDC settings for a provider at `issuer` redirecting to `port`.
#[allow(dead_code)]
pub fn oidc_config(issuer: &str, port: u16) -> OidcConfig {
    OidcConfig {
        issuer_url: Some(issuer.to_string()),
        client_id: Some(CLIENT_ID.to_string()),
        client_secret: None,
        scopes: Some("openid profile".to_string()),
        redirect_url: Some(format!("http://127.0.0.1:{port}/callback")),
    }
}

/// A session against `issuer` without running discovery.
#[allow(dead_code)]
pub fn session_for(issuer: &str, port: u16) -> OidcSession {
    let params =
        SessionParams::from_config(&oidc_config(issuer, port)).expect("valid test config");
    let endpoints = ProviderEndpoints {
        authorization_endpoint: Url::parse(&format!("{issuer}/authorize")).unwrap(),
        token_endpoint: Url::parse(&format!("{issuer}/token")).unwrap(),
    };
    OidcSession::new(params, endpoints)
}

/// A token manager for `issuer` whose login flow uses `browser`.
#[allow(dead_code)]
pub fn auth_for(
    issuer: &str,
    port: u16,
    store: Arc<dyn TokenStore>,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: std::time::Duration,
) -> OidcAuth {
    let http = reqwest::Client::new();
    let flow = AuthorizationCodeFlow::new(http.clone(), browser)
        .with_callback_timeout(callback_timeout);
    OidcAuth::from_session(http, session_for(issuer, port), store, flow)
}

/// Token endpoint response body.
#[allow(dead_code)]
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}

/// Plays the user's part of a login: follows the authorization URL
/// straight to the redirect with a fixed code.
#[derive(Debug)]
#[allow(dead_code)]
pub struct ScriptedBrowser {
    code: String,
    state_override: Option<String>,
    opened: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedBrowser {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            state_override: None,
            opened: AtomicUsize::new(0),
        }
    }

    /// Answers with `state` instead of the one the proxy sent.
    pub fn with_state(mut self, state: &str) -> Self {
        self.state_override = Some(state.to_string());
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let mut redirect = Url::parse(&query["redirect_uri"]).expect("redirect_uri in auth URL");
        let state = self
            .state_override
            .clone()
            .unwrap_or_else(|| query["state"].clone());
        redirect
            .query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &state);

        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
        Ok(())
    }
}
