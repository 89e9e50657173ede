//! Field mapping and the outbound cloud record.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use plclink_common::format_timestamp;

use crate::config::{FieldMapping, MappingConfig, MappingMode};
use crate::error::RelayError;

/// Bookkeeping keys owned by the bridge. Source fields never overwrite them.
pub const RESERVED_KEYS: [&str; 3] = ["id", "timestamp", "timestamp_bridge"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Turns a field source into the cloud field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMapper {
    /// Fixed subset, renamed. Missing sources become `null`.
    Named(Vec<FieldMapping>),
    /// Every non-reserved source field, as is.
    Passthrough,
}

impl FieldMapper {
    pub fn from_config(config: &MappingConfig) -> Self {
        match config.mode {
            MappingMode::Named => FieldMapper::Named(config.fields.clone()),
            MappingMode::Passthrough => FieldMapper::Passthrough,
        }
    }

    pub fn map(&self, source: &Map<String, Value>) -> Map<String, Value> {
        match self {
            FieldMapper::Named(fields) => fields
                .iter()
                .filter(|f| !is_reserved(&f.target))
                .map(|f| {
                    let value = source.get(&f.source).cloned().unwrap_or(Value::Null);
                    (f.target.clone(), value)
                })
                .collect(),
            FieldMapper::Passthrough => source
                .iter()
                .filter(|(key, _)| !is_reserved(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Record published to the cloud broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudMessage {
    /// Fresh per outbound message
    pub id: Uuid,
    /// Origin time carried from the bus message, or relay time
    pub timestamp: String,
    /// Relay time
    pub timestamp_bridge: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CloudMessage {
    /// Stamp mapped fields with a new id and both timestamps.
    ///
    /// The origin timestamp is kept verbatim when it is an RFC 3339 string;
    /// anything else is replaced by `now`.
    pub fn new(
        fields: Map<String, Value>,
        origin: Option<&Value>,
        now: DateTime<FixedOffset>,
    ) -> Self {
        let relayed_at = format_timestamp(&now);
        let timestamp = match origin {
            Some(Value::String(ts)) if DateTime::parse_from_rfc3339(ts).is_ok() => ts.clone(),
            _ => relayed_at.clone(),
        };

        Self {
            id: Uuid::new_v4(),
            timestamp,
            timestamp_bridge: relayed_at,
            fields,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        Ok(serde_json::to_vec(self)?)
    }
}
