//! Cloud bridge.
//!
//! Subscribes to point snapshots on the local bus, maps them to the cloud
//! field names and publishes one record per snapshot to a cloud MQTT broker
//! over mutual TLS.
//!
//! # Configuration
//!
//! ```json5
//! {
//!   bus: { transport: "mqtt", host: "mosquitto", port: 1883 },
//!   relay: { topic: "plc/values" },
//!   cloud: {
//!     mqtt: {
//!       host: "xxxxxxxx-ats.iot.us-east-1.amazonaws.com",
//!       port: 8883,
//!       tls: {
//!         ca: "/certs/AmazonRootCA1.pem",
//!         cert: "/certs/device.pem.crt",
//!         key: "/certs/private.pem.key",
//!       },
//!     },
//!     device_id: "PLC1500",
//!     topic: "plc/{device_id}/values",
//!   },
//! }
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod mapping;
pub mod relay;
pub mod schema;
pub mod source;

pub use cloud::{CloudPublisher, MqttCloudPublisher};
pub use config::{
    CloudBridgeConfig, CloudConfig, FieldMapping, MappingConfig, MappingMode, RelayConfig,
};
pub use error::RelayError;
pub use mapping::{CloudMessage, FieldMapper, RESERVED_KEYS};
pub use relay::{Relay, RelayStats};
pub use schema::{EnvelopeSchema, FlatSchema, Normalized, SchemaDetector, SchemaVariant};
pub use source::{BusSource, MessageHandler, MqttSource, ZenohSource, bus_source};
