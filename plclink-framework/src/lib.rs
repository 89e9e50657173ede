//! plclink service framework
//!
//! Common scaffolding for the plclink services:
//! - [`ServiceArgs`] for CLI argument parsing
//! - [`ServiceConfig`] trait for configuration loading and validation
//! - [`ServiceRunner`] for lifecycle management (logging, tasks, Ctrl+C, shutdown)
//! - [`connect_with_retry`] for unbounded reconnect-with-backoff loops under a [`ReconnectPolicy`]
//! - [`Shutdown`] for cooperative cancellation of workers

mod args;
mod config;
mod error;
mod reconnect;
mod runner;
mod shutdown;

pub use args::ServiceArgs;
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use reconnect::connect_with_retry;
pub use runner::ServiceRunner;
pub use shutdown::{Shutdown, ShutdownTrigger};

pub use plclink_common::{
    Backoff, BusConfig, LoggingConfig, MqttConfig, ReconnectPolicy, TlsConfig, ZenohConfig,
};
