//! Token persistence keyed by issuer
//!
//! Tokens survive proxy restarts so that the browser login is only needed
//! when the refresh token is gone or rejected. The lifecycle code talks to
//! persistence exclusively through the [`TokenStore`] trait:
//!
//! - [`FileTokenStore`] writes one JSON document per issuer into a cache
//!   directory (the default for the binary).
//! - [`MemoryTokenStore`] keeps records in process; used by tests and when
//!   persistence is not wanted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{ProxyError, Result};

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// A token set issued by the provider.
///
/// `expires_in` is kept as the provider sent it. `expires_at` is the
/// absolute expiry derived from it at issue time; it is what gets compared
/// against the clock, and it is persisted so that a token loaded after a
/// restart keeps its real expiry.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::token_store::TokenRecord;
///
/// let record = TokenRecord::new("AT1");
/// assert_eq!(record.token_type, "Bearer");
/// assert!(record.refresh_token.is_none());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The access token presented to the backend.
    pub access_token: String,

    /// The token type, normally `"Bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime in seconds relative to issue time, as reported by the
    /// provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token used for the refresh grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Absolute expiry; `None` means the token never expires.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Creates a bearer record with only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            scope: None,
            expires_at: None,
        }
    }

    /// Returns the refresh token if it is present and non-empty.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Persistence contract for token records, keyed by issuer identity.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Loads the record stored for `issuer_key`, or `None` if there is none.
    async fn load(&self, issuer_key: &str) -> Result<Option<TokenRecord>>;

    /// Stores `record` for `issuer_key`, replacing any previous record.
    async fn save(&self, issuer_key: &str, record: &TokenRecord) -> Result<()>;

    /// Removes the record for `issuer_key`. Removing a missing record is not
    /// an error.
    async fn clear(&self, issuer_key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileTokenStore
// ---------------------------------------------------------------------------

/// File-backed token cache.
///
/// Each issuer maps to `<dir>/<base64url(sha256(issuer))>.json`. Writes go
/// through a temporary file and a rename so a crash never leaves a
/// half-written record behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store in the platform cache directory
    /// (e.g. `~/.cache/authful-mcp-proxy/tokens` on Linux).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Storage`] if no home directory can be determined.
    pub fn in_default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "authful-mcp-proxy").ok_or_else(|| {
            ProxyError::Storage("Could not determine token cache directory".to_string())
        })?;
        Ok(Self::new(dirs.cache_dir().join("tokens")))
    }

    /// The directory records are written into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for `issuer_key`.
    pub fn path_for(&self, issuer_key: &str) -> PathBuf {
        let digest = Sha256::digest(issuer_key.as_bytes());
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, issuer_key: &str) -> Result<Option<TokenRecord>> {
        let path = self.path_for(issuer_key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProxyError::Io(e).into()),
        };

        match serde_json::from_str::<TokenRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable cached token"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, issuer_key: &str, record: &TokenRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            ProxyError::Storage(format!(
                "Failed to create token cache directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.path_for(issuer_key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record).map_err(ProxyError::Serialization)?;

        let written = match write_private(&tmp, &json).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ProxyError::Io(e).into());
        }

        tracing::debug!(path = %path.display(), "Cached token record");
        Ok(())
    }

    async fn clear(&self, issuer_key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(issuer_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProxyError::Io(e).into()),
        }
    }
}

/// Writes `contents` to a new file that is owner-only from creation.
#[cfg(unix)]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    // A stale file would keep its old mode.
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

#[cfg(not(unix))]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// In-process token store.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::{MemoryTokenStore, TokenRecord, TokenStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryTokenStore::new();
/// store.save("https://auth.example.com", &TokenRecord::new("AT1")).await.unwrap();
/// let loaded = store.load("https://auth.example.com").await.unwrap();
/// assert_eq!(loaded.unwrap().access_token, "AT1");
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with one record.
    pub fn with_record(issuer_key: &str, record: TokenRecord) -> Self {
        let mut records = HashMap::new();
        records.insert(issuer_key.to_string(), record);
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, issuer_key: &str) -> Result<Option<TokenRecord>> {
        Ok(self.records.lock().await.get(issuer_key).cloned())
    }

    async fn save(&self, issuer_key: &str, record: &TokenRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(issuer_key.to_string(), record.clone());
        Ok(())
    }

    async fn clear(&self, issuer_key: &str) -> Result<()> {
        self.records.lock().await.remove(issuer_key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
