//! Configuration trait for services.

use std::io::ErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{Result, ServiceError};

/// Top-level configuration of a service binary.
///
/// Loading always validates: a config that loads is one the service can run
/// with.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Deserialize)]
/// pub struct MyServiceConfig {
///     pub bus: BusConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl ServiceConfig for MyServiceConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<()> {
///         self.bus.validate().map_err(Into::into)
///     }
/// }
/// ```
pub trait ServiceConfig: Sized + DeserializeOwned {
    fn logging(&self) -> &LoggingConfig;

    /// Semantic checks that serde defaults cannot express.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse and validate JSON5 text.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON5 file.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServiceError::ConfigNotFound {
                path: path.to_path_buf(),
            },
            _ => ServiceError::Io(e),
        })?;
        Self::parse(&content)
    }
}
