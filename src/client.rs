//! HTTP dispatch against the production-tracker API.
//!
//! One [`Client`] holds the connection settings, the token pair and the
//! underlying connection pool. Every verb funnels through the same dispatch
//! loop, which injects the auth header, classifies the response status and
//! drives the refresh-and-retry cycle on 401/422.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::StreamExt;
use metrics::counter;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Body, Method, Response};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::{AuthRecovery, ClientBuilder};
use crate::telemetry;
use crate::{CallsheetError, Result};

pub(crate) const USER_AGENT: &str = concat!("callsheet/", env!("CARGO_PKG_VERSION"));

const NO_DETAIL: &str = "no additional information";

// ===== URL helpers =====

/// Join URL fragments with single slashes, trimming redundant ones.
///
/// ```
/// # use callsheet::client::url_path_join;
/// let url = url_path_join(["https://tracker.studio/api/", "/data/shots"]);
/// assert_eq!(url, "https://tracker.studio/api/data/shots");
/// ```
pub fn url_path_join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| item.as_ref().trim_matches('/').to_string())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Append url-encoded query parameters to `path`.
///
/// Honors a query string already present in `path` (appends with `&` instead
/// of `?`). Empty `params` returns the path unchanged.
pub fn build_path_with_params<K, V>(path: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return path.to_string();
    }
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.extend_pairs(params);
    let query = query.finish();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{query}")
}

fn with_params(path: &str, params: Option<&[(&str, &str)]>) -> String {
    match params {
        Some(params) => build_path_with_params(path, params),
        None => path.to_string(),
    }
}

/// Whether verbose request/response logging was requested through the
/// `CALLSHEET_DEBUG` environment variable. Read once per process.
pub(crate) fn debug_enabled() -> bool {
    static DEBUG: OnceLock<bool> = OnceLock::new();
    *DEBUG.get_or_init(|| std::env::var("CALLSHEET_DEBUG").is_ok_and(|value| debug_flag(&value)))
}

fn debug_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

// ===== client =====

struct Session {
    host: String,
    event_host: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Asynchronous client for one production-tracker instance.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Host and tokens
/// are interior-mutable so a long-lived client can re-authenticate or be
/// pointed at another instance (last write wins).
pub struct Client {
    http: reqwest::Client,
    session: RwLock<Session>,
    automatic_refresh: bool,
    on_not_authenticated: Option<Arc<dyn AuthRecovery>>,
}

enum Settled {
    Done(Response),
    RetryAuth,
}

impl Client {
    /// Start building a client for the API at `host`.
    pub fn builder(host: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(host)
    }

    pub(crate) fn from_builder(builder: ClientBuilder, http: reqwest::Client) -> Self {
        Self {
            http,
            session: RwLock::new(Session {
                host: builder.host,
                event_host: builder.event_host,
                access_token: builder.access_token,
                refresh_token: builder.refresh_token,
            }),
            automatic_refresh: builder.automatic_refresh,
            on_not_authenticated: builder.on_not_authenticated,
        }
    }

    // ===== session accessors =====

    fn session(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_mut(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The API base URL this client talks to.
    pub fn host(&self) -> String {
        self.session().host.clone()
    }

    /// Point the client at another API base URL.
    pub fn set_host(&self, host: impl Into<String>) {
        self.session_mut().host = host.into();
    }

    /// The event host URL, when one was configured.
    pub fn event_host(&self) -> Option<String> {
        self.session().event_host.clone()
    }

    pub fn set_event_host(&self, url: impl Into<String>) {
        self.session_mut().event_host = Some(url.into());
    }

    /// The current access token, if authenticated.
    pub fn access_token(&self) -> Option<String> {
        self.session().access_token.clone()
    }

    /// Install a fresh access/refresh token pair.
    pub fn set_tokens(&self, access: impl Into<String>, refresh: impl Into<String>) {
        let mut session = self.session_mut();
        session.access_token = Some(access.into());
        session.refresh_token = Some(refresh.into());
    }

    /// Replace the access token, keeping the refresh token.
    pub fn set_access_token(&self, access: impl Into<String>) {
        self.session_mut().access_token = Some(access.into());
    }

    /// Drop both tokens; subsequent requests go out unauthenticated.
    pub fn clear_tokens(&self) {
        let mut session = self.session_mut();
        session.access_token = None;
        session.refresh_token = None;
    }

    pub fn has_refresh_token(&self) -> bool {
        self.session().refresh_token.is_some()
    }

    pub(crate) fn refresh_token(&self) -> Option<String> {
        self.session().refresh_token.clone()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ===== dispatch =====

    /// Perform one classified request. All verbs go through here so the
    /// status mapping and the refresh-retry loop apply uniformly.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let label = method.as_str().to_owned();
        let result = self.dispatch(method, path, body).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(telemetry::REQUESTS_TOTAL, "method" => label, "outcome" => outcome).increment(1);
        result
    }

    async fn dispatch(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = url_path_join([self.host().as_str(), path]);
        loop {
            // Rebuilt every iteration so a retry picks up refreshed tokens.
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(header::USER_AGENT, USER_AGENT);
            if let Some(token) = self.access_token() {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            if debug_enabled() {
                match body {
                    Some(body) => {
                        debug!(method = %method, url = %url, body = %body, "sending request");
                    }
                    None => debug!(method = %method, url = %url, "sending request"),
                }
            }
            let response = request
                .send()
                .await
                .map_err(|e| CallsheetError::Http(e.to_string()))?;
            if debug_enabled() {
                let status = response.status().as_u16();
                debug!(method = %method, url = %url, status, "received response");
            }
            match self.settle(path, response).await? {
                Settled::Done(response) => return Ok(response),
                Settled::RetryAuth => continue,
            }
        }
    }

    /// Map a response status to its outcome. Statuses outside the table are
    /// success, matching the server's use of 2xx and a handful of errors.
    async fn settle(&self, path: &str, response: Response) -> Result<Settled> {
        let status = response.status().as_u16();
        match status {
            400 => Err(CallsheetError::Parameter {
                path: path.to_string(),
                message: parameter_detail(response).await,
            }),
            401 | 422 => {
                drop(response);
                self.recover_not_authenticated(path).await?;
                Ok(Settled::RetryAuth)
            }
            403 => Err(CallsheetError::NotAllowed { path: path.to_string() }),
            404 => Err(CallsheetError::RouteNotFound { path: path.to_string() }),
            405 => Err(CallsheetError::MethodNotAllowed { path: path.to_string() }),
            413 => Err(CallsheetError::TooBigFile { path: path.to_string() }),
            500 | 502 => {
                report_server_failure(path, status, response).await;
                Err(CallsheetError::Server { path: path.to_string(), status })
            }
            _ => Ok(Settled::Done(response)),
        }
    }

    /// Restore authentication after a 401/422, or fail.
    ///
    /// Ok(()) means "retry the request now". There is deliberately no retry
    /// ceiling: repeated rejections keep refreshing as long as refresh
    /// succeeds, and keep consulting the hook as long as it returns `true`.
    /// Each round logs a warning so a refresh loop is observable.
    async fn recover_not_authenticated(&self, path: &str) -> Result<()> {
        if self.automatic_refresh && self.has_refresh_token() {
            match self.refresh_access_token().await {
                Ok(()) => {
                    counter!(telemetry::TOKEN_REFRESHES_TOTAL, "outcome" => "ok").increment(1);
                    warn!(path, "access token rejected, refreshed and retrying");
                    return Ok(());
                }
                Err(e) => {
                    counter!(telemetry::TOKEN_REFRESHES_TOTAL, "outcome" => "error").increment(1);
                    warn!(path, error = %e, "access token refresh failed");
                }
            }
        }
        if let Some(hook) = &self.on_not_authenticated {
            if hook.recover(self).await {
                warn!(path, "recovery hook restored authentication, retrying");
                return Ok(());
            }
        }
        Err(CallsheetError::NotAuthenticated { path: path.to_string() })
    }

    // ===== verbs =====

    /// GET `path`, decoding the body as JSON.
    pub async fn get(&self, path: &str, params: Option<&[(&str, &str)]>) -> Result<Value> {
        let path = with_params(path, params);
        let response = self.request(Method::GET, &path, None).await?;
        decode_json(response).await
    }

    /// GET `path`, returning the raw body text.
    pub async fn get_text(&self, path: &str, params: Option<&[(&str, &str)]>) -> Result<String> {
        let path = with_params(path, params);
        let response = self.request(Method::GET, &path, None).await?;
        response
            .text()
            .await
            .map_err(|e| CallsheetError::Http(e.to_string()))
    }

    /// POST `body` as JSON to `path`, decoding the response body as JSON.
    pub async fn post<B>(&self, path: &str, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self.request(Method::POST, path, Some(&body)).await?;
        decode_json(response).await
    }

    /// PUT `body` as JSON to `path`, decoding the response body as JSON.
    pub async fn put<B>(&self, path: &str, body: &B) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self.request(Method::PUT, path, Some(&body)).await?;
        decode_json(response).await
    }

    /// DELETE `path`, returning the raw body text (usually empty).
    pub async fn delete(&self, path: &str, params: Option<&[(&str, &str)]>) -> Result<String> {
        let path = with_params(path, params);
        let response = self.request(Method::DELETE, &path, None).await?;
        response
            .text()
            .await
            .map_err(|e| CallsheetError::Http(e.to_string()))
    }

    /// Whether the API root answers at all. Transport failures are `false`,
    /// never errors.
    pub async fn host_is_up(&self) -> bool {
        let request = self
            .http
            .get(self.host())
            .header(header::USER_AGENT, USER_AGENT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    // ===== file transfer =====

    /// Stream the body of GET `path` into the file at `target`, overwriting
    /// it. Returns the number of bytes written. The body is copied chunk by
    /// chunk, never buffered whole.
    pub async fn download(
        &self,
        path: &str,
        params: Option<&[(&str, &str)]>,
        target: impl AsRef<Path>,
    ) -> Result<u64> {
        let path = with_params(path, params);
        let response = self.request(Method::GET, &path, None).await?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(target.as_ref()).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CallsheetError::Http(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// POST `file_path` (and any `extra_files`) to `path` as multipart form
    /// data, with `extra_fields` as plain text fields.
    ///
    /// The primary part is named `file`, extras `file-2`, `file-3` and so
    /// on, as the server expects. Files are streamed from disk. A 2xx
    /// response whose JSON body carries a `message` key is a failed upload.
    pub async fn upload(
        &self,
        path: &str,
        file_path: impl AsRef<Path>,
        extra_fields: &[(&str, &str)],
        extra_files: &[&Path],
    ) -> Result<Value> {
        let result = self
            .dispatch_upload(path, file_path.as_ref(), extra_fields, extra_files)
            .await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(telemetry::REQUESTS_TOTAL, "method" => "POST", "outcome" => outcome).increment(1);
        result
    }

    async fn dispatch_upload(
        &self,
        path: &str,
        file_path: &Path,
        extra_fields: &[(&str, &str)],
        extra_files: &[&Path],
    ) -> Result<Value> {
        let url = url_path_join([self.host().as_str(), path]);
        let response = loop {
            // Multipart bodies are single-use; rebuild the form per attempt.
            let mut form = Form::new().part("file", file_part(file_path).await?);
            for (index, extra) in extra_files.iter().enumerate() {
                form = form.part(format!("file-{}", index + 2), file_part(extra).await?);
            }
            for (name, value) in extra_fields {
                form = form.text(name.to_string(), value.to_string());
            }
            let mut request = self
                .http
                .post(&url)
                .header(header::USER_AGENT, USER_AGENT)
                .multipart(form);
            if let Some(token) = self.access_token() {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| CallsheetError::Http(e.to_string()))?;
            match self.settle(path, response).await? {
                Settled::Done(response) => break response,
                Settled::RetryAuth => continue,
            }
        };
        let body = decode_json(response).await?;
        if let Some(message) = body.get("message") {
            let message = match message {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Err(CallsheetError::UploadFailed { message });
        }
        Ok(body)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session();
        f.debug_struct("Client")
            .field("host", &session.host)
            .field("authenticated", &session.access_token.is_some())
            .finish_non_exhaustive()
    }
}

// ===== response helpers =====

async fn decode_json(response: Response) -> Result<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| CallsheetError::Http(e.to_string()))
}

/// Pull the server's explanation out of a 400 body.
async fn parameter_detail(response: Response) -> String {
    match response.json::<Value>().await {
        Ok(body) => match body.get("error").or_else(|| body.get("message")) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => NO_DETAIL.to_string(),
        },
        Err(_) => NO_DETAIL.to_string(),
    }
}

/// Surface whatever diagnostics a 500/502 body carries before the generic
/// failure is returned.
async fn report_server_failure(path: &str, status: u16, response: Response) {
    match response.json::<Value>().await {
        Ok(body) => {
            if let Some(stacktrace) = body.get("stacktrace") {
                error!(path, status, %stacktrace, "server stacktrace");
            }
            match body.get("message") {
                Some(message) => error!(path, status, %message, "server failure"),
                None => error!(path, status, "server failure"),
            }
        }
        Err(_) => error!(path, status, "server failure with unreadable body"),
    }
}

async fn file_part(path: &Path) -> Result<Part> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Part::stream_with_length(Body::from(file), length).file_name(file_name))
}
