//! Configuration for the cloud bridge.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use plclink_common::{BusConfig, DEFAULT_BUS_TOPIC, LoggingConfig, MqttConfig};
use plclink_framework::{ReconnectPolicy, ServiceConfig, ServiceError};

use crate::mapping::is_reserved;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudBridgeConfig {
    /// Local bus the snapshots arrive on
    #[serde(default)]
    pub bus: BusConfig,

    /// Subscription side
    #[serde(default)]
    pub relay: RelayConfig,

    /// Cloud broker side
    pub cloud: CloudConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local bus subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Topic / key expression to subscribe to
    #[serde(default = "default_bus_topic")]
    pub topic: String,

    /// Client id when the bus is MQTT and none is configured
    #[serde(default = "default_relay_client_id")]
    pub client_id: String,

    /// Retry schedule for the bus connection
    #[serde(default = "default_relay_reconnect")]
    pub reconnect: ReconnectPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: default_bus_topic(),
            client_id: default_relay_client_id(),
            reconnect: default_relay_reconnect(),
        }
    }
}

fn default_bus_topic() -> String {
    DEFAULT_BUS_TOPIC.to_string()
}

fn default_relay_client_id() -> String {
    "plc_bridge".to_string()
}

fn default_relay_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::fixed(Duration::from_secs(3))
}

/// Cloud broker (AWS IoT Core or any MQTT broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Broker endpoint, credentials and TLS material
    pub mqtt: MqttConfig,

    /// Substituted for `{device_id}` in `topic`
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_cloud_topic")]
    pub topic: String,

    /// Client id when `mqtt.client_id` is not set
    #[serde(default = "default_cloud_client_id")]
    pub client_id: String,

    /// Retry schedule for the cloud connection
    #[serde(default = "default_cloud_reconnect")]
    pub reconnect: ReconnectPolicy,

    #[serde(default)]
    pub mapping: MappingConfig,
}

impl CloudConfig {
    /// Publish topic with `{device_id}` substituted.
    pub fn resolved_topic(&self) -> String {
        self.topic.replace("{device_id}", &self.device_id)
    }
}

fn default_device_id() -> String {
    "PLC1500".to_string()
}

fn default_cloud_topic() -> String {
    "plc/{device_id}/values".to_string()
}

fn default_cloud_client_id() -> String {
    "PLC1500Bridge".to_string()
}

fn default_cloud_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(32))
}

/// How source fields become cloud fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    /// Only the fields listed in `fields`, renamed.
    #[default]
    Named,
    /// Every source field, unchanged.
    Passthrough,
}

/// One renamed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub mode: MappingMode,

    #[serde(default = "default_fields")]
    pub fields: Vec<FieldMapping>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            mode: MappingMode::default(),
            fields: default_fields(),
        }
    }
}

/// Point names of the reference cell and their cloud names.
fn default_fields() -> Vec<FieldMapping> {
    [
        ("boton123", "inicio_plc1500"),
        ("y1", "sensor_capacitivo_1500"),
        ("y2", "sensor_carrera_1500"),
        ("sale1", "ev_extender_piston"),
        ("entra1", "ev_retraer_piston"),
        ("Tag_e", "inicio_plc1200"),
        ("boton_e", "senal_a_plc1200"),
        ("iy3", "sensor_capacitivo_1200"),
        ("iy4", "sensor_carrera_1200"),
    ]
    .into_iter()
    .map(|(source, target)| FieldMapping::new(source, target))
    .collect()
}

impl ServiceConfig for CloudBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> plclink_framework::Result<()> {
        self.bus.validate()?;

        if self.relay.topic.trim().is_empty() {
            return Err(ServiceError::validation("relay.topic must not be empty"));
        }
        self.relay.reconnect.validate("relay.reconnect")?;
        self.cloud.reconnect.validate("cloud.reconnect")?;

        let cloud = &self.cloud;
        if cloud.mqtt.host.trim().is_empty() {
            return Err(ServiceError::validation("cloud.mqtt.host must not be empty"));
        }
        if let Some(tls) = &cloud.mqtt.tls {
            tls.validate()?;
        }

        let topic = cloud.resolved_topic();
        if topic.is_empty() || topic.contains(|c: char| c == '+' || c == '#') {
            return Err(ServiceError::validation(format!(
                "cloud.topic must be a non-empty topic without wildcards, got '{}'",
                topic
            )));
        }

        let mapping = &cloud.mapping;
        if mapping.mode == MappingMode::Named && mapping.fields.is_empty() {
            return Err(ServiceError::validation(
                "cloud.mapping.fields must not be empty in named mode",
            ));
        }

        let mut targets = HashSet::new();
        for field in &mapping.fields {
            if field.source.is_empty() || field.target.is_empty() {
                return Err(ServiceError::validation(
                    "cloud.mapping.fields entries need a source and a target",
                ));
            }
            if is_reserved(&field.target) {
                return Err(ServiceError::validation(format!(
                    "cloud.mapping target '{}' is reserved",
                    field.target
                )));
            }
            if !targets.insert(field.target.as_str()) {
                return Err(ServiceError::validation(format!(
                    "duplicate cloud.mapping target '{}'",
                    field.target
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{ cloud: { mqtt: { host: "example-ats.iot.us-east-1.amazonaws.com", port: 8883 } } }"#;

    #[test]
    fn test_defaults() {
        let config = CloudBridgeConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.bus.transport(), "zenoh");
        assert_eq!(config.relay.topic, "plc/values");
        assert_eq!(
            config.relay.reconnect,
            ReconnectPolicy::fixed(Duration::from_secs(3))
        );
        assert_eq!(config.cloud.resolved_topic(), "plc/PLC1500/values");
        assert_eq!(config.cloud.client_id, "PLC1500Bridge");
        assert_eq!(
            config.cloud.reconnect,
            ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(32))
        );
        assert_eq!(config.cloud.mapping.mode, MappingMode::Named);
        assert_eq!(config.cloud.mapping.fields.len(), 9);
        assert_eq!(
            config.cloud.mapping.fields[0],
            FieldMapping::new("boton123", "inicio_plc1500")
        );
    }

    #[test]
    fn test_device_id_substitution() {
        let config = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker" }, device_id: "PLC1200", topic: "site/{device_id}/telemetry" } }"#,
        )
        .unwrap();
        assert_eq!(config.cloud.resolved_topic(), "site/PLC1200/telemetry");
    }

    #[test]
    fn test_passthrough_mode() {
        let config = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker" }, mapping: { mode: "passthrough" } } }"#,
        )
        .unwrap();
        assert_eq!(config.cloud.mapping.mode, MappingMode::Passthrough);
    }

    #[test]
    fn test_missing_cloud_section() {
        assert!(matches!(
            CloudBridgeConfig::parse("{}"),
            Err(ServiceError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_reserved_target_rejected() {
        let result = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker" }, mapping: { fields: [ { source: "y1", target: "timestamp" } ] } } }"#,
        );
        assert!(matches!(result, Err(ServiceError::ConfigValidation(_))));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let result = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker" }, mapping: { fields: [
                { source: "y1", target: "sensor" },
                { source: "y2", target: "sensor" },
            ] } } }"#,
        );
        assert!(matches!(result, Err(ServiceError::ConfigValidation(_))));
    }

    #[test]
    fn test_zero_reconnect_delay_rejected() {
        let relay = CloudBridgeConfig::parse(
            r#"{ relay: { reconnect: { backoff: "fixed", delay_ms: 0 } }, cloud: { mqtt: { host: "broker" } } }"#,
        );
        assert!(matches!(relay, Err(ServiceError::ConfigValidation(_))));

        let cloud = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker" }, reconnect: { backoff: "exponential", initial_ms: 0, max_ms: 32000 } } }"#,
        );
        assert!(matches!(cloud, Err(ServiceError::ConfigValidation(_))));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let result =
            CloudBridgeConfig::parse(r#"{ cloud: { mqtt: { host: "broker" }, topic: "plc/#" } }"#);
        assert!(matches!(result, Err(ServiceError::ConfigValidation(_))));
    }

    #[test]
    fn test_missing_tls_files_rejected() {
        let result = CloudBridgeConfig::parse(
            r#"{ cloud: { mqtt: { host: "broker", port: 8883, tls: {
                ca: "/nonexistent/AmazonRootCA1.pem",
                cert: "/nonexistent/certificate.pem.crt",
                key: "/nonexistent/private.pem.key",
            } } } }"#,
        );
        assert!(matches!(result, Err(ServiceError::ConfigValidation(_))));
    }
}
