//! plclink common library
//!
//! Shared types and utilities for the plclink services:
//!
//! - [`config`] - Configuration primitives (bus transport, MQTT, TLS, logging) in JSON5
//! - [`envelope`] - Acquisition snapshots and their bus envelope
//! - [`bus`] - Publishing on the local bus (Zenoh or MQTT)
//! - [`mqtt`] - MQTT client construction with TLS
//! - [`reconnect`] - Reconnect delay schedules
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod mqtt;
pub mod reconnect;
pub mod session;

pub use bus::{BusPublisher, MqttBusPublisher, ZenohBusPublisher, connect_publisher};
pub use config::{BusConfig, LogFormat, LoggingConfig, MqttConfig, TlsConfig, ZenohConfig};
pub use envelope::{BusEnvelope, DEFAULT_BUS_TOPIC, PointValues, Snapshot, format_timestamp};
pub use error::{Error, Result};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use session::{connect, session_config};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
