//! Cloud bridge.
//!
//! Relays point snapshots from the local bus to a cloud MQTT broker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use plclink_bridge_cloud::{
    CloudBridgeConfig, CloudPublisher, FieldMapper, MqttCloudPublisher, Relay, bus_source,
};
use plclink_framework::{ServiceArgs, ServiceConfig, ServiceRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServiceArgs::parse_with_default("cloud.json5");

    let config = CloudBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = ServiceRunner::new("plclink-bridge-cloud", config, Some(&args))?;
    info!("Loaded configuration from {:?}", args.config);

    let config = runner.config();
    let publisher = Arc::new(
        MqttCloudPublisher::start(&config.cloud).context("Failed to start cloud publisher")?,
    );
    let relay = Arc::new(Relay::new(
        FieldMapper::from_config(&config.cloud.mapping),
        config.cloud.resolved_topic(),
        publisher.clone(),
    ));
    info!(
        bus_topic = %config.relay.topic,
        cloud_topic = %relay.topic(),
        mode = ?config.cloud.mapping.mode,
        "Relay ready"
    );

    let source = bus_source(&config.bus, &config.relay);
    let shutdown = runner.shutdown();
    runner.spawn("relay", async move {
        source.run(relay.clone(), shutdown).await;
        let stats = relay.stats();
        info!(
            relayed = stats.relayed,
            parse_failures = stats.parse_failures,
            publish_failures = stats.publish_failures,
            "Relay stopped"
        );
        publisher.close().await;
    });

    runner.run().await?;
    Ok(())
}
