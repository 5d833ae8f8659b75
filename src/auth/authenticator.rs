//! Bearer authentication for outgoing backend requests
//!
//! [`RequestAuthenticator`] is a two-phase hook around a `reqwest` call:
//!
//! 1. [`prepare`](RequestAuthenticator::prepare) attaches
//!    `Authorization: Bearer <token>` using a token that is valid now.
//! 2. [`on_response`](RequestAuthenticator::on_response) inspects the
//!    response. A `401` forces a renewal and yields the request again with
//!    the new token, exactly once per request. Anything else, a second
//!    `401`, or a failed renewal hands the response back unchanged.
//!
//! [`send`](RequestAuthenticator::send) runs both phases against a client.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};

use crate::auth::manager::OidcAuth;
use crate::error::{ProxyError, Result};

/// What to do after a response was inspected.
#[derive(Debug)]
pub enum AuthAction {
    /// Send this request (same request, new token)
    Retry(Request),
    /// Hand this response to the caller
    Done(Response),
}

/// Per-request bookkeeping between the two phases.
#[derive(Debug)]
pub struct AuthExchange {
    token: String,
    spare: Option<Request>,
    retried: bool,
}

impl AuthExchange {
    /// Whether the one allowed retry has been used.
    pub fn retried(&self) -> bool {
        self.retried
    }
}

/// Attaches tokens from an [`OidcAuth`] and retries once on `401`.
#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    auth: Arc<OidcAuth>,
}

impl RequestAuthenticator {
    /// Wraps a shared renewal engine.
    pub fn new(auth: Arc<OidcAuth>) -> Self {
        Self { auth }
    }

    /// The underlying renewal engine.
    pub fn auth(&self) -> &Arc<OidcAuth> {
        &self.auth
    }

    /// Attaches a valid bearer token to `request`.
    ///
    /// A copy of the request is kept for the retry when its body can be
    /// cloned; streaming bodies are sent once.
    ///
    /// # Errors
    ///
    /// Propagates the renewal engine's error when no valid token can be
    /// obtained.
    pub async fn prepare(&self, mut request: Request) -> Result<(Request, AuthExchange)> {
        let token = self.auth.ensure_valid_token().await?;
        set_bearer(&mut request, &token)?;
        let spare = request.try_clone();
        Ok((
            request,
            AuthExchange {
                token,
                spare,
                retried: false,
            },
        ))
    }

    /// Decides between retrying and returning `response`.
    pub async fn on_response(&self, exchange: &mut AuthExchange, response: Response) -> AuthAction {
        if response.status() != StatusCode::UNAUTHORIZED || exchange.retried {
            return AuthAction::Done(response);
        }
        let Some(mut retry) = exchange.spare.take() else {
            tracing::warn!("Backend returned 401 for a request that cannot be replayed");
            return AuthAction::Done(response);
        };
        exchange.retried = true;

        let token = match self.auth.force_renewal(&exchange.token).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "Token renewal after 401 failed; returning the 401");
                return AuthAction::Done(response);
            }
        };
        if let Err(e) = set_bearer(&mut retry, &token) {
            tracing::error!(error = %e, "Renewed token is not a valid header value");
            return AuthAction::Done(response);
        }

        tracing::debug!("Retrying request with renewed token");
        exchange.token = token;
        AuthAction::Retry(retry)
    }

    /// Sends `request` through `client` with authentication and at most
    /// one retry.
    ///
    /// # Errors
    ///
    /// - The renewal engine's error if no token can be obtained up front.
    /// - [`ProxyError::Transport`] if a send fails.
    pub async fn send(&self, client: &Client, request: Request) -> Result<Response> {
        let (request, mut exchange) = self.prepare(request).await?;
        let mut response = execute(client, request).await?;
        loop {
            match self.on_response(&mut exchange, response).await {
                AuthAction::Done(response) => return Ok(response),
                AuthAction::Retry(retry) => response = execute(client, retry).await?,
            }
        }
    }
}

async fn execute(client: &Client, request: Request) -> Result<Response> {
    client
        .execute(request)
        .await
        .map_err(|e| ProxyError::transport("backend request", e).into())
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ProxyError::Auth("access token contains invalid characters".to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Client::new()
            .post("http://127.0.0.1:9/mcp")
            .body("{}")
            .build()
            .unwrap()
    }

    #[test]
    fn test_set_bearer_replaces_existing_header() {
        let mut req = request();
        set_bearer(&mut req, "AT1").unwrap();
        set_bearer(&mut req, "AT2").unwrap();

        let values: Vec<_> = req.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Bearer AT2");
        assert!(values[0].is_sensitive());
    }

    #[test]
    fn test_set_bearer_rejects_control_characters() {
        let mut req = request();
        let err = set_bearer(&mut req, "bad\ntoken").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProxyError>(),
            Some(ProxyError::Auth(_))
        ));
    }

    // Retry behaviour against wiremock is covered in tests/authenticator_test.rs
}
