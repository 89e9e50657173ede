//! Bus-to-cloud relay: parse, normalize, map, enrich, publish.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cloud::CloudPublisher;
use crate::error::RelayError;
use crate::mapping::{CloudMessage, FieldMapper};
use crate::schema::SchemaDetector;
use crate::source::MessageHandler;

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: u64,
    pub parse_failures: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    relayed: AtomicU64,
    parse_failures: AtomicU64,
    publish_failures: AtomicU64,
}

/// Turns each bus message into one cloud publish.
pub struct Relay {
    detector: SchemaDetector,
    mapper: FieldMapper,
    topic: String,
    publisher: Arc<dyn CloudPublisher>,
    counters: Counters,
}

impl Relay {
    pub fn new(mapper: FieldMapper, topic: impl Into<String>, publisher: Arc<dyn CloudPublisher>) -> Self {
        Self {
            detector: SchemaDetector::default(),
            mapper,
            topic: topic.into(),
            publisher,
            counters: Counters::default(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the cloud record for a bus payload.
    pub fn transform(&self, payload: &[u8], now: DateTime<FixedOffset>) -> Result<CloudMessage, RelayError> {
        let message: Value = serde_json::from_slice(payload)?;
        let normalized = self.detector.normalize(&message)?;
        let fields = self.mapper.map(normalized.fields);

        debug!(schema = normalized.schema, fields = fields.len(), "Normalized bus message");
        Ok(CloudMessage::new(fields, message.get("timestamp"), now))
    }

    /// Transform and publish one payload. Returns the record's id.
    pub async fn relay(&self, payload: &[u8]) -> Result<Uuid, RelayError> {
        let message = self.transform(payload, Utc::now().fixed_offset())?;
        self.publisher.publish(&self.topic, message.encode()?).await?;
        Ok(message.id)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            relayed: self.counters.relayed.load(Ordering::Relaxed),
            parse_failures: self.counters.parse_failures.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        match self.relay(payload).await {
            Ok(id) => {
                self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                debug!(bus_topic = topic, cloud_topic = %self.topic, %id, "Relayed message");
            }
            Err(e) => {
                let counter = if e.is_parse_failure() {
                    &self.counters.parse_failures
                } else {
                    &self.counters.publish_failures
                };
                counter.fetch_add(1, Ordering::Relaxed);
                warn!(
                    bus_topic = topic,
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropped bus message"
                );
            }
        }
    }
}
