//! OIDC token lifecycle
//!
//! Everything needed to put a valid bearer token on each backend request:
//!
//! - [`discovery`] resolves the provider's endpoints once at startup.
//! - [`pkce`] generates verifier/challenge pairs and state nonces.
//! - [`session`] holds parameters, endpoints and the current token, and
//!   builds URLs and request bodies.
//! - [`grant`] talks to the token endpoint.
//! - [`callback`] and [`browser`] carry the interactive part of a login.
//! - [`flow`] drives one authorization-code login.
//! - [`token_store`] persists tokens across restarts.
//! - [`manager`] decides between cached token, refresh and login, one
//!   renewal at a time.
//! - [`authenticator`] attaches tokens to requests and retries once on 401.

pub mod authenticator;
pub mod browser;
pub mod callback;
pub mod discovery;
pub mod flow;
pub mod grant;
pub mod manager;
pub mod pkce;
pub mod session;
pub mod token_store;

pub use authenticator::{AuthAction, RequestAuthenticator};
pub use manager::OidcAuth;
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenRecord, TokenStore};
