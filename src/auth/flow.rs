//! Interactive authorization-code login with PKCE
//!
//! One call to [`AuthorizationCodeFlow::run`] is one login attempt:
//!
//! 1. Generate a PKCE S256 pair and a random `state` nonce.
//! 2. Bind the local callback listener on the redirect URI.
//! 3. Print the authorization URL and try to open it in a browser.
//! 4. Wait (bounded) for the redirect carrying `code` and `state`.
//! 5. Check `state` in constant time, then require a `code`.
//! 6. Exchange the code at the token endpoint.
//!
//! The flow returns the issued [`TokenRecord`]; storing and persisting it is
//! left to the renewal engine, which also guarantees that only one attempt
//! runs at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::browser::{present_authorization_url, BrowserLauncher};
use crate::auth::callback::{CallbackListener, CallbackParams, CALLBACK_TIMEOUT};
use crate::auth::grant::{request_tokens, GrantKind};
use crate::auth::pkce::{constant_time_eq, generate_state, PkceChallenge};
use crate::auth::session::OidcSession;
use crate::auth::token_store::TokenRecord;
use crate::error::{ProxyError, Result};

// ---------------------------------------------------------------------------
// FlowState
// ---------------------------------------------------------------------------

/// Progress of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing has happened yet
    Idle,
    /// PKCE pair and state nonce exist
    ChallengeGenerated,
    /// The authorization URL was handed to the user
    BrowserOpened,
    /// Listening for the redirect
    AwaitingCallback,
    /// A callback with a matching state and a code arrived
    CodeReceived,
    /// The token endpoint issued tokens
    TokenExchanged,
    /// Terminal success
    Complete,
    /// Terminal failure
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::ChallengeGenerated => "challenge_generated",
            FlowState::BrowserOpened => "browser_opened",
            FlowState::AwaitingCallback => "awaiting_callback",
            FlowState::CodeReceived => "code_received",
            FlowState::TokenExchanged => "token_exchanged",
            FlowState::Complete => "complete",
            FlowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Attempt {
    state: FlowState,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: FlowState::Idle,
        }
    }

    fn advance(&mut self, next: FlowState) {
        tracing::debug!(from = %self.state, to = %next, "Login flow transition");
        self.state = next;
    }

    fn fail(&mut self, err: &anyhow::Error) {
        tracing::error!(at = %self.state, error = %err, "Login flow failed");
        self.state = FlowState::Failed;
    }
}

// ---------------------------------------------------------------------------
// Callback validation
// ---------------------------------------------------------------------------

/// Checks a redirect against the expected state and extracts the code.
///
/// # Errors
///
/// Returns [`ProxyError::Auth`] when the state is missing or differs, when
/// the provider reported an error, or when no code is present.
pub fn validate_callback(params: &CallbackParams, expected_state: &str) -> Result<String> {
    let state_matches = params
        .state
        .as_deref()
        .is_some_and(|returned| constant_time_eq(returned, expected_state));
    if !state_matches {
        return Err(ProxyError::Auth("state mismatch - possible CSRF".to_string()).into());
    }

    if let Some(error) = &params.error {
        let message = match &params.error_description {
            Some(description) => format!("provider returned {error}: {description}"),
            None => format!("provider returned {error}"),
        };
        return Err(ProxyError::Auth(message).into());
    }

    params
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::Auth("no authorization code".to_string()).into())
}

// ---------------------------------------------------------------------------
// AuthorizationCodeFlow
// ---------------------------------------------------------------------------

/// Drives interactive logins for one session.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeFlow {
    http: reqwest::Client,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: Duration,
}

impl AuthorizationCodeFlow {
    /// Creates a flow using the default 300 second callback timeout.
    pub fn new(http: reqwest::Client, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            http,
            browser,
            callback_timeout: CALLBACK_TIMEOUT,
        }
    }

    /// Overrides how long to wait for the redirect.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Runs one login attempt against `session`'s provider.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::AuthTimeout`] if no redirect arrives in time.
    /// - [`ProxyError::Auth`] for a state mismatch, a provider error, a
    ///   missing code, a listener that cannot bind, or a rejected exchange.
    /// - [`ProxyError::Transport`] if the token endpoint is unreachable.
    pub async fn run(&self, session: &OidcSession) -> Result<TokenRecord> {
        let mut attempt = Attempt::new();
        match self.drive(session, &mut attempt).await {
            Ok(record) => {
                attempt.advance(FlowState::Complete);
                tracing::info!("OIDC login completed");
                Ok(record)
            }
            Err(e) => {
                attempt.fail(&e);
                Err(e)
            }
        }
    }

    async fn drive(&self, session: &OidcSession, attempt: &mut Attempt) -> Result<TokenRecord> {
        let pkce = PkceChallenge::generate();
        let state = generate_state();
        attempt.advance(FlowState::ChallengeGenerated);

        let listener = CallbackListener::bind(
            &session.redirect_host(),
            session.redirect_port(),
            session.redirect_path(),
        )
        .await?;

        let authorization_url = session.authorization_url(&state, &pkce);
        present_authorization_url(self.browser.as_ref(), &authorization_url);
        attempt.advance(FlowState::BrowserOpened);

        attempt.advance(FlowState::AwaitingCallback);
        let params = listener.wait(self.callback_timeout).await?;
        let code = validate_callback(&params, &state)?;
        attempt.advance(FlowState::CodeReceived);

        let form = session.token_exchange_body(&code, &pkce.verifier);
        let record = request_tokens(
            &self.http,
            &session.endpoints().token_endpoint,
            &form,
            GrantKind::AuthorizationCode,
        )
        .await?;
        attempt.advance(FlowState::TokenExchanged);

        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    fn auth_message(result: Result<String>) -> String {
        let err = result.unwrap_err();
        match err.downcast_ref::<ProxyError>() {
            Some(ProxyError::Auth(msg)) => msg.clone(),
            other => panic!("expected Auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_callback_accepts_matching_state() {
        let code = validate_callback(&params(Some("abc123"), Some("s1")), "s1").unwrap();
        assert_eq!(code, "abc123");
    }

    #[test]
    fn test_validate_callback_rejects_mismatched_state() {
        let msg = auth_message(validate_callback(&params(Some("abc123"), Some("evil")), "s1"));
        assert!(msg.contains("state mismatch"));
    }

    #[test]
    fn test_validate_callback_rejects_missing_state() {
        let msg = auth_message(validate_callback(&params(Some("abc123"), None), "s1"));
        assert!(msg.contains("state mismatch"));
    }

    #[test]
    fn test_validate_callback_requires_code() {
        let msg = auth_message(validate_callback(&params(None, Some("s1")), "s1"));
        assert_eq!(msg, "no authorization code");

        let msg = auth_message(validate_callback(&params(Some(""), Some("s1")), "s1"));
        assert_eq!(msg, "no authorization code");
    }

    #[test]
    fn test_validate_callback_surfaces_provider_error() {
        let callback = CallbackParams {
            state: Some("s1".to_string()),
            error: Some("access_denied".to_string()),
            error_description: Some("User cancelled".to_string()),
            ..Default::default()
        };
        let msg = auth_message(validate_callback(&callback, "s1"));
        assert!(msg.contains("access_denied"));
        assert!(msg.contains("User cancelled"));
    }

    #[test]
    fn test_flow_state_display() {
        assert_eq!(FlowState::AwaitingCallback.to_string(), "awaiting_callback");
        assert_eq!(FlowState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_attempt_transitions() {
        let mut attempt = Attempt::new();
        assert_eq!(attempt.state, FlowState::Idle);
        attempt.advance(FlowState::ChallengeGenerated);
        assert_eq!(attempt.state, FlowState::ChallengeGenerated);
        attempt.fail(&anyhow::anyhow!("boom"));
        assert_eq!(attempt.state, FlowState::Failed);
    }

    // End-to-end flow tests against wiremock are in tests/auth_flow_test.rs
}
