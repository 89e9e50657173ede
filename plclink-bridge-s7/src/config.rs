//! Configuration for the S7 acquisition bridge.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use plclink_common::{BusConfig, DEFAULT_BUS_TOPIC, LoggingConfig};
use plclink_framework::{ReconnectPolicy, ServiceConfig, ServiceError};

use crate::address::{AddressError, translate};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S7BridgeConfig {
    /// Local bus the snapshots are published on
    #[serde(default)]
    pub bus: BusConfig,

    /// Controller connection
    #[serde(default)]
    pub s7: S7Config,

    /// Poll cycle, point list and reconnect behavior
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Optional InfluxDB v2 time-series sink
    #[serde(default)]
    pub influx: Option<InfluxConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// S7 controller connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S7Config {
    #[serde(default = "default_host")]
    pub host: String,

    /// ISO-on-TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub rack: u8,

    #[serde(default = "default_slot")]
    pub slot: u8,

    /// Bound on connect and on every request
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rack: 0,
            slot: default_slot(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl S7Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_host() -> String {
    "192.168.100.10".to_string()
}

fn default_port() -> u16 {
    102
}

fn default_slot() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Where point values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A real controller reached through the `s7` section.
    #[default]
    S7,
    /// Pseudo-random values, for staging without hardware.
    Synthetic,
}

/// A named boolean point at a symbolic address such as `%I0.2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointDefinition {
    pub name: String,
    pub address: String,
}

impl PointDefinition {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Acquisition loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub source: SourceKind,

    /// Seed for the synthetic source (random when unset)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Bus topic / key expression for snapshots
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Client id used when the bus is MQTT and none is configured
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Sleep between the end of one cycle and the start of the next
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fixed UTC offset of snapshot timestamps, in minutes east of UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Delay schedule while DISCONNECTED
    #[serde(default = "default_reconnect")]
    pub reconnect: ReconnectPolicy,

    #[serde(default = "default_points")]
    pub points: Vec<PointDefinition>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            seed: None,
            topic: default_topic(),
            client_id: default_client_id(),
            poll_interval_ms: default_poll_interval_ms(),
            utc_offset_minutes: 0,
            reconnect: default_reconnect(),
            points: default_points(),
        }
    }
}

impl AcquisitionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timestamp offset; UTC if the configured value is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
    }

    /// Points whose address does not translate. They stay configured and
    /// are skipped on every cycle.
    pub fn invalid_points(&self) -> Vec<(&PointDefinition, AddressError)> {
        self.points
            .iter()
            .filter_map(|p| translate(&p.address).err().map(|e| (p, e)))
            .collect()
    }
}

fn default_topic() -> String {
    DEFAULT_BUS_TOPIC.to_string()
}

fn default_client_id() -> String {
    "plc_publisher".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::fixed(Duration::from_secs(5))
}

/// Point list of the reference cell: a 1500 station and a 1200 station.
fn default_points() -> Vec<PointDefinition> {
    [
        ("boton123", "%I0.2"),
        ("y1", "%I0.1"),
        ("y2", "%I0.0"),
        ("sale1", "%Q0.0"),
        ("entra1", "%Q0.1"),
        ("Tag_e", "%I0.3"),
        ("boton_e", "%Q12.5"),
        ("iy3", "%I20.3"),
        ("iy4", "%I20.4"),
    ]
    .into_iter()
    .map(|(name, address)| PointDefinition::new(name, address))
    .collect()
}

/// InfluxDB v2 write endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://influxdb2:8086`
    pub url: String,

    pub org: String,

    pub bucket: String,

    /// API token sent as `Authorization: Token <token>`
    pub token: String,

    #[serde(default = "default_measurement")]
    pub measurement: String,

    #[serde(default = "default_influx_timeout_ms")]
    pub timeout_ms: u64,
}

impl InfluxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_measurement() -> String {
    "plc_tags".to_string()
}

fn default_influx_timeout_ms() -> u64 {
    5000
}

impl ServiceConfig for S7BridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> plclink_framework::Result<()> {
        self.bus.validate()?;

        if self.acquisition.source == SourceKind::S7 {
            if self.s7.host.trim().is_empty() {
                return Err(ServiceError::validation("s7.host must not be empty"));
            }
            if self.s7.rack > 7 {
                return Err(ServiceError::validation(format!(
                    "s7.rack must be 0-7, got {}",
                    self.s7.rack
                )));
            }
            if self.s7.slot > 31 {
                return Err(ServiceError::validation(format!(
                    "s7.slot must be 0-31, got {}",
                    self.s7.slot
                )));
            }
            if self.s7.timeout_ms == 0 {
                return Err(ServiceError::validation("s7.timeout_ms must be positive"));
            }
        }

        let acquisition = &self.acquisition;
        if acquisition.poll_interval_ms == 0 {
            return Err(ServiceError::validation(
                "acquisition.poll_interval_ms must be positive",
            ));
        }
        if acquisition.topic.trim().is_empty() {
            return Err(ServiceError::validation(
                "acquisition.topic must not be empty",
            ));
        }
        if FixedOffset::east_opt(acquisition.utc_offset_minutes.saturating_mul(60)).is_none() {
            return Err(ServiceError::validation(format!(
                "acquisition.utc_offset_minutes out of range: {}",
                acquisition.utc_offset_minutes
            )));
        }
        acquisition.reconnect.validate("acquisition.reconnect")?;
        if acquisition.points.is_empty() {
            return Err(ServiceError::validation(
                "acquisition.points must contain at least one point",
            ));
        }

        let mut names = HashSet::new();
        for point in &acquisition.points {
            if point.name.trim().is_empty() {
                return Err(ServiceError::validation(format!(
                    "point with address '{}' has an empty name",
                    point.address
                )));
            }
            if !names.insert(point.name.as_str()) {
                return Err(ServiceError::validation(format!(
                    "duplicate point name '{}'",
                    point.name
                )));
            }
        }

        if let Some(influx) = &self.influx {
            if !(influx.url.starts_with("http://") || influx.url.starts_with("https://")) {
                return Err(ServiceError::validation(format!(
                    "influx.url must be an http(s) URL, got '{}'",
                    influx.url
                )));
            }
            if influx.org.is_empty() || influx.bucket.is_empty() {
                return Err(ServiceError::validation(
                    "influx.org and influx.bucket must not be empty",
                ));
            }
            if influx.measurement.is_empty() {
                return Err(ServiceError::validation(
                    "influx.measurement must not be empty",
                ));
            }
        }

        Ok(())
    }
}
