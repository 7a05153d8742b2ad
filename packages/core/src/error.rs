//! Error types shared by the remote clients, the fan-out engine and the
//! aggregators.
//!
//! Remote failures are classified up front so callers can tell a missing
//! secret apart from a failed request: [`Error::NotFound`] is a meaningful
//! answer for sync and diff, every other variant is a genuine failure.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{message} (HTTP {status}{})", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled before start")]
    Cancelled,

    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(", {}", c))
        .unwrap_or_default()
}

impl Error {
    /// Returns true if the remote service reported the resource as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Classify a non-success HTTP response from an Azure endpoint.
    ///
    /// `body` is the raw response body; Azure wraps errors as
    /// `{"error": {"code": "...", "message": "..."}}` but proxies and
    /// gateways may return plain text or nothing at all.
    pub fn from_response(status: u16, body: &str, resource: &str) -> Self {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let (code, message) = match envelope {
            Some(ErrorEnvelope { error }) => (error.code, error.message),
            None => (None, None),
        };
        let message = message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("request for {} failed", resource));

        match status {
            404 => Error::NotFound(resource.to_string()),
            401 | 403 => Error::Auth(match code {
                Some(code) => format!("{} ({})", message, code),
                None => message,
            }),
            _ => Error::Api {
                status,
                code,
                message,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}
