use std::error::Error as StdError;
use std::io::ErrorKind;
use thiserror::Error;

/// Vendor API errors, classified so the retry layer can tell transient
/// failures from permanent ones.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("vendor account is not registered")]
    EmailNotRegistered,
    #[error("vendor account password is wrong")]
    WrongPassword,
    #[error("vendor API accepted the login but returned an empty token")]
    MissingToken,
    #[error("vendor API returned code {code}: {msg}")]
    UnexpectedCode { code: String, msg: String },
    #[error("vendor API returned HTTP {status}")]
    Status { status: u16 },
    #[error("vendor API transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Transient failures worth another attempt: server-side HTTP errors
    /// and connection-level timeouts/resets. Credential problems and
    /// malformed responses are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status } => *status >= 500,
            ApiError::Transport(e) => is_transient(e),
            _ => false,
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    // Walk the source chain looking for the underlying socket error.
    let mut source = StdError::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::ConnectionReset);
        }
        source = inner.source();
    }
    false
}
