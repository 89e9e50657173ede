//! Snapshot sinks: the local bus and the InfluxDB v2 historian.
//!
//! Sinks are best-effort and independent. A failing sink is logged and the
//! cycle carries on with the next one.

use std::fmt::Write as _;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use plclink_common::{BusPublisher, Snapshot};

use crate::config::InfluxConfig;

/// Sink failure for one snapshot.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Bus publish failed: {0}")]
    Bus(#[from] plclink_common::Error),

    #[error("Time-series write failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Time-series write rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Receives every snapshot of a cycle.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError>;

    /// Release the sink's connection.
    async fn close(&self) {}
}

/// Publishes the snapshot's bus envelope on a fixed topic.
pub struct BusSink {
    publisher: Box<dyn BusPublisher>,
    topic: String,
}

impl BusSink {
    pub fn new(publisher: Box<dyn BusPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl SnapshotSink for BusSink {
    fn name(&self) -> &str {
        "bus"
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let payload = snapshot.to_envelope().encode()?;
        self.publisher.publish(&self.topic, payload).await?;
        debug!(topic = %self.topic, points = snapshot.len(), "Published snapshot");
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "Failed to close bus publisher");
        }
    }
}

/// Writes one `plc_tags,tag=<name> value=<0|1>i` point per value, in a
/// single request per snapshot.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            measurement: config.measurement.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSink for InfluxSink {
    fn name(&self) -> &str {
        "influx"
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let body = line_protocol(&self.measurement, snapshot);
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(points = snapshot.len(), "Wrote snapshot to InfluxDB");
        Ok(())
    }
}

/// Render a snapshot as InfluxDB line protocol, one line per value, with the
/// snapshot time in epoch nanoseconds.
pub fn line_protocol(measurement: &str, snapshot: &Snapshot) -> String {
    let measurement = escape(measurement, &[',', ' ']);
    let time = snapshot.timestamp().timestamp_nanos_opt();

    let mut out = String::new();
    for (name, value) in snapshot.values() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "{},tag={} value={}i",
            measurement,
            escape(name, &[',', '=', ' ']),
            u8::from(*value)
        );
        if let Some(ns) = time {
            let _ = write!(out, " {ns}");
        }
    }
    out
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Hands each snapshot to every sink in order.
pub struct SinkFanout {
    sinks: Vec<Box<dyn SnapshotSink>>,
}

impl SinkFanout {
    pub fn new(sinks: Vec<Box<dyn SnapshotSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Publish to all sinks. Returns how many succeeded.
    pub async fn publish(&self, snapshot: &Snapshot) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.publish(snapshot).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(sink = sink.name(), error = %e, "Sink publish failed"),
            }
        }
        delivered
    }

    pub async fn close(&self) {
        for sink in &self.sinks {
            sink.close().await;
        }
    }
}
