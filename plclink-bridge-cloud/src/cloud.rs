//! Cloud broker publisher.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use plclink_common::mqtt;
use plclink_framework::ReconnectPolicy;

use crate::config::CloudConfig;
use crate::error::RelayError;

/// Publishes cloud records.
#[async_trait]
pub trait CloudPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError>;

    async fn close(&self) {}
}

/// MQTT publisher for the cloud broker.
///
/// The event loop runs on a background task that reconnects on its own with
/// the configured backoff. Publishes never wait for the connection: while
/// the broker is unreachable they fill the client's request queue and are
/// rejected once it is full.
pub struct MqttCloudPublisher {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl MqttCloudPublisher {
    /// Build the client (TLS material is read here) and start the event loop.
    pub fn start(config: &CloudConfig) -> plclink_common::Result<Self> {
        let options = mqtt::mqtt_options(&config.mqtt, &config.client_id)?;
        let broker = options.broker_address();
        let (client, eventloop) = AsyncClient::new(options, mqtt::REQUEST_CAPACITY);

        info!(host = %broker.0, port = broker.1, "Connecting to cloud broker");
        let driver = tokio::spawn(drive(eventloop, config.reconnect));

        Ok(Self { client, driver })
    }
}

async fn drive(mut eventloop: EventLoop, policy: ReconnectPolicy) {
    let mut backoff = policy.backoff();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(failed_attempts = backoff.attempts(), "Connected to cloud broker");
                backoff.reset();
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(pkid = ack.pkid, "Cloud publish acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt = backoff.attempts(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Cloud broker connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl CloudPublisher for MqttCloudPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| RelayError::Publish(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Cloud disconnect not queued");
        }
        // Let the event loop flush pending acks and the DISCONNECT packet.
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.driver.abort();
        info!("Cloud publisher closed");
    }
}

impl Drop for MqttCloudPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
