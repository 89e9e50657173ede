//! Startup and lifecycle errors.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Everything that can stop a service from starting, or fail it on exit.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {}", .path.display())]
    ConfigNotFound { path: PathBuf },

    /// JSON5 syntax or a field of the wrong type.
    #[error("Invalid configuration syntax: {0}")]
    ConfigParse(String),

    /// Well-formed but semantically wrong.
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<json5::Error> for ServiceError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Bus and TLS checks in the common crate report `Config`; at this level
/// they are validation failures.
impl From<plclink_common::Error> for ServiceError {
    fn from(err: plclink_common::Error) -> Self {
        match err {
            plclink_common::Error::Config(msg) => Self::ConfigValidation(msg),
            other => Self::Config(other.to_string()),
        }
    }
}
