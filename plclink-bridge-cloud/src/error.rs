//! Relay errors. All of them are local to one bus message.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("Unsupported payload shape: expected a JSON object, got {0}")]
    UnsupportedShape(&'static str),

    #[error("Cloud publish failed: {0}")]
    Publish(String),
}

impl RelayError {
    /// Parse and shape errors count as parse failures; publish errors don't.
    pub fn is_parse_failure(&self) -> bool {
        !matches!(self, RelayError::Publish(_))
    }
}

/// JSON type name for log messages.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
