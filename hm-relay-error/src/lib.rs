pub mod api;

use api::ApiError;
use rumqttc::v5::ClientError;
use std::io::Error as IoError;
use thiserror::Error;
use tokio::task::JoinError;

pub type HmResult<T, E = HmError> = Result<T, E>;

/// Process-wide error type.
///
/// Only bootstrap-phase errors are allowed to bubble up to `main` and
/// terminate the process; runtime errors stay inside their component and
/// are logged there.
#[derive(Error, Debug)]
pub enum HmError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no usable devices after validation")]
    NoDevices,
    #[error("broker '{0}' is not present in the broker catalog")]
    UnknownBroker(String),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] ClientError),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Join(#[from] JoinError),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for HmError {
    #[inline]
    fn from(e: String) -> Self {
        HmError::Msg(e)
    }
}

impl From<&str> for HmError {
    #[inline]
    fn from(e: &str) -> Self {
        HmError::Msg(e.to_string())
    }
}

impl From<validator::ValidationErrors> for HmError {
    #[inline]
    fn from(e: validator::ValidationErrors) -> Self {
        HmError::Validation(e.to_string())
    }
}
