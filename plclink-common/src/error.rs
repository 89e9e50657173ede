use std::time::Duration;

use thiserror::Error;

/// Errors from the shared bus and configuration layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent settings.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    /// Client request or connection failure from rumqttc.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("No broker answer within {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        Error::Mqtt(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(e: rumqttc::ConnectionError) -> Self {
        Error::Mqtt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
