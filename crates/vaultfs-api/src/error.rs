use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server speaks API version {server}, this client supports {supported}")]
    VersionMismatch { server: String, supported: String },

    #[error("login failed: {0}")]
    Auth(String),

    #[error("not found")]
    NotFound,

    #[error("ambiguous query: {0}")]
    Ambiguous(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: HTTP {status}: {message}")]
    Http {
        context: String,
        status: u16,
        message: String,
    },

    /// 5xx on deposit registration. Usually a server-side integrity hiccup
    /// (duplicate file pending assembly) that clears up on its own.
    #[error("{context}: HTTP {status}: {message} (transient, retry after a short delay)")]
    Transient {
        context: String,
        status: u16,
        message: String,
    },

    #[error("{context}: transport error: {message}")]
    Transport { context: String, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Map a `ureq` error into the API taxonomy. 404 folds into the
    /// resolver-facing `NotFound`; the error body, when readable, becomes
    /// the message.
    pub(crate) fn from_ureq(context: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(404, _) => ApiError::NotFound,
            ureq::Error::Status(status, resp) => {
                let message = status_message(resp);
                ApiError::Http {
                    context: context.to_string(),
                    status,
                    message,
                }
            }
            ureq::Error::Transport(t) => ApiError::Transport {
                context: context.to_string(),
                message: t.to_string(),
            },
        }
    }
}

/// Extract a short human-readable message from an error response.
pub(crate) fn status_message(resp: ureq::Response) -> String {
    let status_text = resp.status_text().to_string();
    match resp.into_string() {
        Ok(body) if !body.trim().is_empty() => {
            let body = body.trim();
            // Keep error bodies short; they may be full HTML pages.
            if body.len() > 200 {
                status_text
            } else {
                body.to_string()
            }
        }
        _ => status_text,
    }
}
