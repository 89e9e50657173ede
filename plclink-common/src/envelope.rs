//! Snapshot model and its wire form on the local bus.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bus topic / key expression for acquisition snapshots.
pub const DEFAULT_BUS_TOPIC: &str = "plc/values";

/// Point name to boolean value for one acquisition cycle.
pub type PointValues = BTreeMap<String, bool>;

/// One cycle's successfully-read point values plus its capture time.
///
/// Points that failed to read are absent from the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    timestamp: DateTime<FixedOffset>,
    values: PointValues,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<FixedOffset>, values: PointValues) -> Self {
        Self { timestamp, values }
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn values(&self) -> &PointValues {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build the bus envelope carrying this snapshot.
    pub fn to_envelope(&self) -> BusEnvelope {
        BusEnvelope {
            timestamp: format_timestamp(&self.timestamp),
            values: self.values.clone(),
        }
    }
}

/// JSON body published on the bus: `{"timestamp": "...", "values": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// ISO-8601 timestamp with explicit UTC offset.
    pub timestamp: String,
    pub values: PointValues,
}

impl BusEnvelope {
    /// Serialize to UTF-8 JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Render a timestamp as RFC 3339 with microseconds and a numeric offset
/// (`+00:00` rather than `Z`).
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}
