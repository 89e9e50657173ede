use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Zenoh bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// "peer" (default), "client" or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Routers or peers to dial, e.g. `tcp/10.0.0.5:7447`.
    #[serde(default)]
    pub connect: Vec<String>,

    /// Local endpoints to accept sessions on.
    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address.
    pub host: String,

    /// Broker port (default: 1883, use 8883 with TLS).
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier. A per-service default is used when omitted.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Time allowed for the initial CONNACK, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// TLS settings. Plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// PEM files for a TLS broker connection.
///
/// `cert` and `key` enable mutual TLS and must be given together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA certificate bundle used to verify the broker.
    pub ca: PathBuf,

    /// Client certificate.
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Client private key.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    /// Check the certificate/key pairing and that every referenced file exists.
    pub fn validate(&self) -> Result<()> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(Error::Config(
                "TLS client cert and key must be configured together".to_string(),
            ));
        }

        let files = std::iter::once(&self.ca)
            .chain(self.cert.iter())
            .chain(self.key.iter());
        for file in files {
            if !file.exists() {
                return Err(Error::Config(format!(
                    "TLS file not found: {}",
                    file.display()
                )));
            }
        }

        Ok(())
    }
}

/// Transport used for the local publish/subscribe bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum BusConfig {
    /// Zenoh session (peer/client/router).
    Zenoh(ZenohConfig),
    /// MQTT broker (e.g. a local Mosquitto).
    Mqtt(MqttConfig),
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig::Zenoh(ZenohConfig::default())
    }
}

impl BusConfig {
    /// Short transport name for logs.
    pub fn transport(&self) -> &'static str {
        match self {
            BusConfig::Zenoh(_) => "zenoh",
            BusConfig::Mqtt(_) => "mqtt",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            BusConfig::Zenoh(zenoh) => match zenoh.mode.as_str() {
                "client" | "peer" | "router" => Ok(()),
                other => Err(Error::Config(format!(
                    "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                    other
                ))),
            },
            BusConfig::Mqtt(mqtt) => {
                if mqtt.host.is_empty() {
                    return Err(Error::Config("MQTT bus host cannot be empty".to_string()));
                }
                match &mqtt.tls {
                    Some(tls) => tls.validate(),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text for terminals.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

/// `logging` section shared by every service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        bus: BusConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_bus_is_zenoh_peer() {
        let config: Wrapper = json5::from_str("{}").unwrap();

        assert_eq!(config.bus, BusConfig::Zenoh(ZenohConfig::default()));
        assert_eq!(config.bus.transport(), "zenoh");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_zenoh_bus() {
        let text = r#"
        {
            bus: {
                transport: "zenoh",
                mode: "client",
                connect: ["tcp/localhost:7447"],
            },
            logging: { level: "debug", format: "json" },
        }
        "#;

        let config: Wrapper = json5::from_str(text).unwrap();

        match config.bus {
            BusConfig::Zenoh(zenoh) => {
                assert_eq!(zenoh.mode, "client");
                assert_eq!(zenoh.connect, vec!["tcp/localhost:7447"]);
            }
            other => panic!("Expected zenoh bus, got {:?}", other),
        }
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_mqtt_bus_defaults() {
        let text = r#"{ bus: { transport: "mqtt", host: "mosquitto" } }"#;

        let config: Wrapper = json5::from_str(text).unwrap();

        match config.bus {
            BusConfig::Mqtt(mqtt) => {
                assert_eq!(mqtt.host, "mosquitto");
                assert_eq!(mqtt.port, 1883);
                assert_eq!(mqtt.keep_alive_secs, 60);
                assert_eq!(mqtt.connect_timeout_secs, 10);
                assert!(mqtt.tls.is_none());
                assert!(mqtt.client_id.is_none());
            }
            other => panic!("Expected mqtt bus, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_zenoh_mode_rejected() {
        let bus = BusConfig::Zenoh(ZenohConfig {
            mode: "satellite".to_string(),
            ..ZenohConfig::default()
        });
        assert!(bus.validate().is_err());
    }

    #[test]
    fn test_tls_requires_cert_and_key_together() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        let cert = dir.path().join("client.crt");
        std::fs::write(&ca, "ca").unwrap();
        std::fs::write(&cert, "cert").unwrap();

        let tls = TlsConfig {
            ca: ca.clone(),
            cert: Some(cert),
            key: None,
        };
        assert!(tls.validate().is_err());

        let ca_only = TlsConfig {
            ca,
            cert: None,
            key: None,
        };
        assert!(ca_only.validate().is_ok());
    }

    #[test]
    fn test_tls_missing_file_rejected() {
        let tls = TlsConfig {
            ca: PathBuf::from("/nonexistent/AmazonRootCA1.pem"),
            cert: None,
            key: None,
        };
        let err = tls.validate().unwrap_err();
        assert!(err.to_string().contains("AmazonRootCA1.pem"));
    }
}
