//! Publishing side of the local bus.
//!
//! Bus messages are fire-and-forget: Zenoh puts use `CongestionControl::Drop`
//! and MQTT publishes use QoS 0.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::task::JoinHandle;
use zenoh::qos::CongestionControl;

use crate::config::{BusConfig, MqttConfig};
use crate::error::{Error, Result};
use crate::mqtt;
use crate::reconnect::ReconnectPolicy;

/// A connected bus publisher.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish one payload on `topic` without waiting for acknowledgment.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// Connect a publisher for the configured bus transport.
///
/// `reconnect` paces the MQTT event loop after it loses the broker; Zenoh
/// sessions handle their own reconnection.
pub async fn connect_publisher(
    config: &BusConfig,
    default_client_id: &str,
    reconnect: ReconnectPolicy,
) -> Result<Box<dyn BusPublisher>> {
    match config {
        BusConfig::Zenoh(zenoh) => {
            let session = crate::session::connect(zenoh).await?;
            Ok(Box::new(ZenohBusPublisher::new(session)))
        }
        BusConfig::Mqtt(mqtt) => Ok(Box::new(
            MqttBusPublisher::connect(mqtt, default_client_id, reconnect).await?,
        )),
    }
}

/// Bus publisher over a Zenoh session.
pub struct ZenohBusPublisher {
    session: zenoh::Session,
}

impl ZenohBusPublisher {
    pub fn new(session: zenoh::Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl BusPublisher for ZenohBusPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(topic, payload)
            .congestion_control(CongestionControl::Drop)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.session.close().await?;
        Ok(())
    }
}

/// Bus publisher over an MQTT broker connection.
///
/// The event loop runs on a background task for the lifetime of the publisher.
pub struct MqttBusPublisher {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl MqttBusPublisher {
    pub async fn connect(
        config: &MqttConfig,
        default_client_id: &str,
        reconnect: ReconnectPolicy,
    ) -> Result<Self> {
        let options = mqtt::mqtt_options(config, default_client_id)?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let (client, eventloop) = mqtt::connect(options, timeout).await?;

        let driver = tokio::spawn(drive(eventloop, reconnect));

        Ok(Self { client, driver })
    }
}

/// Keep polling the event loop; rumqttc reconnects on the next poll after
/// an error.
async fn drive(mut eventloop: EventLoop, reconnect: ReconnectPolicy) {
    let mut backoff = reconnect.backoff();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if backoff.attempts() > 0 {
                    tracing::info!(failed_attempts = backoff.attempts(), "Reconnected to bus broker");
                }
                backoff.reset();
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    attempt = backoff.attempts(),
                    retry_in_ms = delay.as_millis() as u64,
                    "MQTT bus event loop error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl BusPublisher for MqttBusPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // try_publish never waits on a stalled event loop.
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(Error::from)
    }

    async fn close(&self) -> Result<()> {
        let result = self.client.try_disconnect().map_err(Error::from);
        // Give the event loop a moment to flush the DISCONNECT packet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.driver.abort();
        result
    }
}

impl Drop for MqttBusPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rumqttc::MqttOptions;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_driver_retries_at_policy_pace() {
        // Broker that hangs up on every connection before CONNACK.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });

        let options = MqttOptions::new("plclink-bus-test", "127.0.0.1", port);
        let (_client, eventloop) = AsyncClient::new(options, mqtt::REQUEST_CAPACITY);
        let driver = tokio::spawn(drive(
            eventloop,
            ReconnectPolicy::fixed(Duration::from_millis(100)),
        ));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        driver.abort();

        assert!(accepted.load(Ordering::SeqCst) >= 3);
    }
}
