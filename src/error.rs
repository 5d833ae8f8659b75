//! Error types for the authful MCP proxy
//!
//! This module defines the error taxonomy used by the OIDC token lifecycle
//! and the stdio bridge, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for proxy operations
///
/// Variants follow the failure classes of the token lifecycle: startup
/// configuration problems, failed or rejected authorization attempts,
/// renewal failures that are normally recovered locally, and network-level
/// transport failures.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Missing or invalid issuer, client id, redirect URL or discovered
    /// endpoints. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single authorization attempt failed (state mismatch, missing code,
    /// rejected code exchange, provider-reported error).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The browser redirect did not reach the callback listener in time.
    #[error("Authentication timed out after {seconds} seconds waiting for the OAuth callback")]
    AuthTimeout {
        /// The bound that elapsed
        seconds: u64,
    },

    /// Refresh grant unavailable or rejected.
    #[error("Token renewal error: {0}")]
    Renewal(String),

    /// Network-level failure on an outgoing HTTP call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Token cache failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// How an error is reported to the operator by the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Single actionable line, no diagnostic detail
    Configuration,
    /// Short classification prefix plus the message
    Runtime,
    /// Full diagnostic chain; indicates a bug rather than a misconfiguration
    Internal,
}

impl ProxyError {
    /// Returns the reporting class for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProxyError::Configuration(_) | ProxyError::Url(_) => ErrorClass::Configuration,
            ProxyError::Auth(_)
            | ProxyError::AuthTimeout { .. }
            | ProxyError::Renewal(_)
            | ProxyError::Transport(_)
            | ProxyError::Http(_)
            | ProxyError::Storage(_)
            | ProxyError::Io(_) => ErrorClass::Runtime,
            ProxyError::Serialization(_) => ErrorClass::Internal,
        }
    }

    /// Wraps a `reqwest` failure with a label naming the call that failed.
    ///
    /// Timeouts and connection failures become [`ProxyError::Transport`];
    /// anything else keeps its `reqwest` error for diagnostics.
    pub fn transport(label: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Transport(format!("{label}: request timed out"))
        } else if err.is_connect() {
            ProxyError::Transport(format!("{label}: connection failed: {err}"))
        } else {
            ProxyError::Transport(format!("{label}: {err}"))
        }
    }
}

/// Classifies an arbitrary error chain by looking for a [`ProxyError`].
///
/// Errors that carry no `ProxyError` anywhere in their chain are treated as
/// [`ErrorClass::Internal`].
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProxyError>())
        .map(ProxyError::class)
        .unwrap_or(ErrorClass::Internal)
}

/// Result type alias for proxy operations
///
/// Uses `anyhow::Error` so that context can be layered on while callers can
/// still recover the [`ProxyError`] with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = ProxyError::Configuration("missing client id".to_string());
        assert_eq!(error.to_string(), "Configuration error: missing client id");
    }

    #[test]
    fn test_auth_error_display() {
        let error = ProxyError::Auth("no authorization code".to_string());
        assert_eq!(
            error.to_string(),
            "Authentication error: no authorization code"
        );
    }

    #[test]
    fn test_auth_timeout_display_mentions_bound() {
        let error = ProxyError::AuthTimeout { seconds: 300 };
        assert!(error.to_string().contains("300 seconds"));
    }

    #[test]
    fn test_renewal_error_display() {
        let error = ProxyError::Renewal("no refresh token available".to_string());
        assert_eq!(
            error.to_string(),
            "Token renewal error: no refresh token available"
        );
    }

    #[test]
    fn test_storage_error_display() {
        let error = ProxyError::Storage("cache dir unavailable".to_string());
        assert_eq!(error.to_string(), "Storage error: cache dir unavailable");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ProxyError = io_error.into();
        assert!(matches!(error, ProxyError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ProxyError = json_error.into();
        assert!(matches!(error, ProxyError::Serialization(_)));
    }

    #[test]
    fn test_class_of_each_variant() {
        assert_eq!(
            ProxyError::Configuration("x".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(ProxyError::Auth("x".into()).class(), ErrorClass::Runtime);
        assert_eq!(
            ProxyError::AuthTimeout { seconds: 1 }.class(),
            ErrorClass::Runtime
        );
        assert_eq!(ProxyError::Renewal("x".into()).class(), ErrorClass::Runtime);
        assert_eq!(
            ProxyError::Transport("x".into()).class(),
            ErrorClass::Runtime
        );
    }

    #[test]
    fn test_classify_finds_proxy_error_under_context() {
        let err = anyhow::Error::new(ProxyError::Configuration("bad issuer".into()))
            .context("building session");
        assert_eq!(classify(&err), ErrorClass::Configuration);
    }

    #[test]
    fn test_classify_unknown_error_is_internal() {
        let err = anyhow::anyhow!("something unexpected");
        assert_eq!(classify(&err), ErrorClass::Internal);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProxyError>();
    }
}
