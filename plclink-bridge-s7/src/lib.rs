//! S7 acquisition bridge.
//!
//! Polls boolean points from a Siemens S7 controller over ISO-on-TCP and
//! publishes one snapshot per cycle to the local bus, optionally writing it
//! to InfluxDB as well.
//!
//! # Configuration
//!
//! ```json5
//! {
//!   bus: { transport: "mqtt", host: "mosquitto", port: 1883 },
//!   s7: { host: "192.168.100.10", rack: 0, slot: 1 },
//!   acquisition: {
//!     topic: "plc/values",
//!     poll_interval_ms: 1000,
//!     utc_offset_minutes: -360,
//!     points: [
//!       { name: "boton123", address: "%I0.2" },
//!       { name: "sale1", address: "%Q0.0" },
//!     ],
//!   },
//!   influx: { url: "http://influxdb2:8086", org: "OT", bucket: "Historian", token: "..." },
//! }
//! ```

pub mod acquisition;
pub mod address;
pub mod config;
pub mod reader;
pub mod s7;
pub mod sink;

pub use acquisition::{
    AcquisitionError, AcquisitionLoop, AcquisitionStats, Connection, Connector, PlantConnector,
};
pub use address::{AddressError, Area, ParsedAddress, translate};
pub use config::{InfluxConfig, PointDefinition, S7BridgeConfig, S7Config, SourceKind};
pub use reader::{Controller, ControllerReader, PointReader, ReadError, SyntheticReader};
pub use s7::{S7Client, S7Error};
pub use sink::{BusSink, InfluxSink, SinkError, SinkFanout, SnapshotSink, line_protocol};
