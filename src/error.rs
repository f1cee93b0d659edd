//! Callsheet error types

/// Callsheet error types
///
/// One variant per server failure class (the status-code mapping lives in
/// the dispatch loop of [`Client`](crate::Client)), plus transport and
/// decoding carriers. Every variant is surfaced to the caller; the only
/// built-in recovery is the authentication-refresh retry inside dispatch.
#[derive(Debug, thiserror::Error)]
pub enum CallsheetError {
    // Status-mapped API errors
    #[error("bad request on {path}: {message}")]
    Parameter { path: String, message: String },

    #[error("not authenticated on {path}")]
    NotAuthenticated { path: String },

    #[error("not allowed on {path}")]
    NotAllowed { path: String },

    #[error("method not allowed on {path}")]
    MethodNotAllowed { path: String },

    #[error("route not found: {path}")]
    RouteNotFound { path: String },

    /// 413 from the server or a proxy in front of it.
    #[error("file too big on {path}: request body exceeds the server or proxy size limit")]
    TooBigFile { path: String },

    /// Generic 500/502 signal. Server-provided stack trace and message are
    /// logged when present, never carried in the error itself.
    #[error("server error ({status}) on {path}")]
    Server { path: String, status: u16 },

    /// The upload endpoint answered 2xx but reported an error message.
    #[error("upload failed: {message}")]
    UploadFailed { message: String },

    /// Explicit login rejection (bad credentials or `login: false` body).
    #[error("authentication failed")]
    AuthenticationFailed,

    // Transport/data errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for callsheet operations
pub type Result<T> = std::result::Result<T, CallsheetError>;
