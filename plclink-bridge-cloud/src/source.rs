//! Local bus subscriptions.
//!
//! A source owns its bus connection for the life of the bridge: it
//! reconnects on failure, resubscribes on every new connection and hands
//! each message to the handler in arrival order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Packet, QoS, SubscribeReasonCode};
use tracing::{debug, error, info, trace, warn};
use zenoh::sample::SampleKind;

use plclink_common::{BusConfig, MqttConfig, ZenohConfig, mqtt};
use plclink_framework::{ReconnectPolicy, Shutdown, connect_with_retry};

use crate::config::RelayConfig;

/// Receives bus messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// A local bus subscription.
#[async_trait]
pub trait BusSource: Send + Sync {
    /// Deliver messages to `handler` until shutdown.
    async fn run(&self, handler: Arc<dyn MessageHandler>, shutdown: Shutdown);
}

/// Source for the configured bus transport.
pub fn bus_source(bus: &BusConfig, relay: &RelayConfig) -> Box<dyn BusSource> {
    match bus {
        BusConfig::Zenoh(zenoh) => Box::new(ZenohSource::new(
            zenoh.clone(),
            relay.topic.clone(),
            relay.reconnect,
        )),
        BusConfig::Mqtt(mqtt) => Box::new(MqttSource::new(
            mqtt.clone(),
            relay.topic.clone(),
            relay.client_id.clone(),
            relay.reconnect,
        )),
    }
}

/// Zenoh subscriber on a key expression.
pub struct ZenohSource {
    config: ZenohConfig,
    key_expr: String,
    reconnect: ReconnectPolicy,
}

impl ZenohSource {
    pub fn new(config: ZenohConfig, key_expr: String, reconnect: ReconnectPolicy) -> Self {
        Self {
            config,
            key_expr,
            reconnect,
        }
    }
}

#[async_trait]
impl BusSource for ZenohSource {
    async fn run(&self, handler: Arc<dyn MessageHandler>, mut shutdown: Shutdown) {
        loop {
            let Some(session) =
                connect_with_retry(&self.reconnect, "zenoh bus", &mut shutdown, || {
                    plclink_common::connect(&self.config)
                })
                .await
            else {
                return;
            };

            match session.declare_subscriber(&self.key_expr).await {
                Ok(subscriber) => {
                    info!(key_expr = %self.key_expr, "Subscribed to bus");

                    loop {
                        tokio::select! {
                            _ = shutdown.wait() => {
                                let _ = subscriber.undeclare().await;
                                let _ = session.close().await;
                                info!("Bus subscription stopped");
                                return;
                            }

                            sample = subscriber.recv_async() => match sample {
                                Ok(sample) => {
                                    if sample.kind() == SampleKind::Delete {
                                        trace!(key = %sample.key_expr(), "Ignoring delete sample");
                                        continue;
                                    }
                                    let payload = sample.payload().to_bytes();
                                    handler.handle(sample.key_expr().as_str(), &payload).await;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Bus subscriber closed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(key_expr = %self.key_expr, error = %e, "Failed to subscribe to bus");
                }
            }

            let _ = session.close().await;
            if shutdown.sleep(self.reconnect.delay_for(1)).await {
                return;
            }
        }
    }
}

/// MQTT subscription on a local broker.
pub struct MqttSource {
    config: MqttConfig,
    topic: String,
    client_id: String,
    reconnect: ReconnectPolicy,
}

impl MqttSource {
    pub fn new(
        config: MqttConfig,
        topic: String,
        client_id: String,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            config,
            topic,
            client_id,
            reconnect,
        }
    }
}

#[async_trait]
impl BusSource for MqttSource {
    async fn run(&self, handler: Arc<dyn MessageHandler>, mut shutdown: Shutdown) {
        let options = match mqtt::mqtt_options(&self.config, &self.client_id) {
            Ok(options) => options,
            Err(e) => {
                error!(error = %e, "Invalid bus MQTT settings");
                return;
            }
        };
        let (client, mut eventloop) = AsyncClient::new(options, mqtt::REQUEST_CAPACITY);
        let mut backoff = self.reconnect.backoff();

        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                _ = shutdown.wait() => break,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %self.config.host, port = self.config.port, "Connected to bus broker");
                    backoff.reset();
                    // Clean sessions forget subscriptions: subscribe on every connect.
                    if let Err(e) = client.try_subscribe(&self.topic, QoS::AtMostOnce) {
                        warn!(topic = %self.topic, error = %e, "Failed to queue bus subscription");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if subscription_granted(&ack.return_codes) {
                        info!(topic = %self.topic, "Subscribed to bus");
                    } else {
                        warn!(
                            topic = %self.topic,
                            return_codes = ?ack.return_codes,
                            "Bus broker refused the subscription"
                        );
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.handle(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Bus connection error"
                    );
                    if shutdown.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        if client.try_disconnect().is_ok() {
            let _ = tokio::time::timeout(Duration::from_millis(200), eventloop.poll()).await;
        }
        debug!("Bus subscription stopped");
    }
}

fn subscription_granted(return_codes: &[SubscribeReasonCode]) -> bool {
    !return_codes.is_empty()
        && return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}
