//! Client construction: connection settings, credentials, recovery hook.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::Client;
use crate::{CallsheetError, Result};

/// Recovery hook consulted when a request is rejected as not authenticated
/// (401/422) and automatic token refresh is unavailable or has failed.
///
/// Return `true` to retry the rejected request. The hook is consulted again
/// each time a retry is rejected; the dispatch loop imposes no cap of its
/// own, so an implementation that always returns `true` retries forever.
/// A typical implementation logs in again through the same client (which
/// stores fresh tokens) and returns `true` once.
#[async_trait]
pub trait AuthRecovery: Send + Sync {
    /// Attempt to restore authentication. `client` is the instance whose
    /// request was rejected; installing new tokens on it makes the retry
    /// use them.
    async fn recover(&self, client: &Client) -> bool;
}

/// Builder for [`Client`] instances.
///
/// Construction is explicit; there is no process-wide default client, and
/// several independent clients may coexist (e.g. source and target in a
/// sync scenario).
///
/// ```rust,no_run
/// # use callsheet::Client;
/// let client = Client::builder("https://tracker.studio/api")
///     .tokens("access-jwt", "refresh-jwt")
///     .build()?;
/// # Ok::<(), callsheet::CallsheetError>(())
/// ```
pub struct ClientBuilder {
    pub(crate) host: String,
    pub(crate) event_host: Option<String>,
    pub(crate) ssl_verify: bool,
    pub(crate) client_cert: Option<PathBuf>,
    pub(crate) access_token: Option<String>,
    pub(crate) refresh_token: Option<String>,
    pub(crate) automatic_refresh: bool,
    pub(crate) on_not_authenticated: Option<Arc<dyn AuthRecovery>>,
}

impl ClientBuilder {
    /// Start a builder for the API at `host` (the full API base URL,
    /// e.g. `https://tracker.studio/api`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            event_host: None,
            ssl_verify: true,
            client_cert: None,
            access_token: None,
            refresh_token: None,
            automatic_refresh: true,
            on_not_authenticated: None,
        }
    }

    /// Set the event host URL (consumed by event-subscription tooling,
    /// not by this crate).
    pub fn event_host(mut self, url: impl Into<String>) -> Self {
        self.event_host = Some(url.into());
        self
    }

    /// Enable or disable TLS certificate verification. Default: enabled.
    pub fn ssl_verify(mut self, verify: bool) -> Self {
        self.ssl_verify = verify;
        self
    }

    /// Use a client certificate (PEM bundle with certificate and key).
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(path.into());
        self
    }

    /// Install an access/refresh token pair.
    pub fn tokens(mut self, access: impl Into<String>, refresh: impl Into<String>) -> Self {
        self.access_token = Some(access.into());
        self.refresh_token = Some(refresh.into());
        self
    }

    /// Install an access token only. Without a refresh token, 401/422
    /// responses will not trigger an automatic refresh.
    pub fn access_token(mut self, access: impl Into<String>) -> Self {
        self.access_token = Some(access.into());
        self
    }

    /// Enable or disable the transparent refresh-and-retry on 401/422.
    /// Default: enabled (effective once a refresh token is present).
    pub fn automatic_refresh(mut self, enabled: bool) -> Self {
        self.automatic_refresh = enabled;
        self
    }

    /// Install a recovery hook consulted when refresh is unavailable or
    /// has failed. See [`AuthRecovery`].
    pub fn on_not_authenticated(mut self, hook: Arc<dyn AuthRecovery>) -> Self {
        self.on_not_authenticated = Some(hook);
        self
    }

    /// Build the [`Client`].
    ///
    /// # Errors
    ///
    /// Returns [`CallsheetError::Configuration`] when the host URL does not
    /// parse, the client certificate cannot be read, or the underlying HTTP
    /// client cannot be constructed.
    pub fn build(self) -> Result<Client> {
        if url::Url::parse(&self.host).is_err() {
            return Err(CallsheetError::Configuration(format!(
                "invalid host URL: {}",
                self.host
            )));
        }

        let mut http = reqwest::Client::builder();
        if !self.ssl_verify {
            http = http.danger_accept_invalid_certs(true);
        }
        if let Some(ref path) = self.client_cert {
            let pem = std::fs::read(path).map_err(|e| {
                CallsheetError::Configuration(format!(
                    "failed to read client certificate {}: {e}",
                    path.display()
                ))
            })?;
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                CallsheetError::Configuration(format!(
                    "invalid client certificate {}: {e}",
                    path.display()
                ))
            })?;
            http = http.identity(identity);
        }
        // No explicit timeout: transport defaults apply.
        let http = http.build().map_err(|e| {
            CallsheetError::Configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Client::from_builder(self, http))
    }
}
