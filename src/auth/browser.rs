//! Opening the authorization URL
//!
//! The flow never depends on the browser actually opening: the URL is also
//! printed to stderr so the user can copy it by hand.

use url::Url;

use crate::error::{ProxyError, Result};

/// Something that can send the user to an authorization URL.
pub trait BrowserLauncher: Send + Sync + std::fmt::Debug {
    /// Opens `url`. Errors are reported but never abort the flow.
    fn open(&self, url: &Url) -> Result<()>;
}

/// Opens URLs in the user's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        webbrowser::open(url.as_str())
            .map_err(|e| ProxyError::Auth(format!("failed to launch browser: {e}")).into())
    }
}

/// Never opens anything; the printed URL is the only way in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

impl BrowserLauncher for NoBrowser {
    fn open(&self, _url: &Url) -> Result<()> {
        Ok(())
    }
}

/// Writes the authorization URL to stderr and tries to open it.
pub fn present_authorization_url(launcher: &dyn BrowserLauncher, url: &Url) {
    tracing::info!(url = %url, "Opening browser for OIDC login");
    eprintln!("Open the following URL in your browser to log in:\n{url}");

    if let Err(e) = launcher.open(url) {
        tracing::warn!(error = %e, "Could not open a browser; open the URL manually");
    }
}
