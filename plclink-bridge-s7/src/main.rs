//! S7 acquisition bridge.
//!
//! Polls a Siemens S7 controller and publishes point snapshots to the local
//! bus and, when configured, to InfluxDB.

use anyhow::{Context, Result};
use tracing::{info, warn};

use plclink_bridge_s7::{AcquisitionLoop, S7BridgeConfig, SourceKind};
use plclink_framework::{ServiceArgs, ServiceConfig, ServiceRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServiceArgs::parse_with_default("s7.json5");

    let config = S7BridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = ServiceRunner::new("plclink-bridge-s7", config, Some(&args))?;
    info!("Loaded configuration from {:?}", args.config);

    let config = runner.config();
    match config.acquisition.source {
        SourceKind::S7 => info!(
            host = %config.s7.host,
            port = config.s7.port,
            rack = config.s7.rack,
            slot = config.s7.slot,
            "Controller source"
        ),
        SourceKind::Synthetic => {
            warn!("Synthetic source: values are random, not read from a controller")
        }
    }
    for (point, e) in config.acquisition.invalid_points() {
        warn!(
            point = %point.name,
            address = %point.address,
            error = %e,
            "Point will be skipped every cycle"
        );
    }

    let acquisition = AcquisitionLoop::from_config(config);
    let shutdown = runner.shutdown();
    runner.spawn("acquisition", async move {
        acquisition.run(shutdown).await;
    });

    runner.run().await?;
    Ok(())
}
