//! MQTT client construction shared by the bus transport and the cloud publisher.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Transport};

use crate::config::{MqttConfig, TlsConfig};
use crate::error::{Error, Result};

/// Capacity of the request channel between an `AsyncClient` and its event loop.
pub const REQUEST_CAPACITY: usize = 64;

/// Build `MqttOptions` from configuration, loading TLS material from disk.
pub fn mqtt_options(config: &MqttConfig, default_client_id: &str) -> Result<MqttOptions> {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| default_client_id.to_string());

    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    if let Some(tls) = &config.tls {
        options.set_transport(tls_transport(tls)?);
    }

    Ok(options)
}

fn tls_transport(tls: &TlsConfig) -> Result<Transport> {
    let ca = read_pem(&tls.ca)?;
    let client_auth = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
        (None, None) => None,
        _ => {
            return Err(Error::Config(
                "TLS client cert and key must be configured together".to_string(),
            ));
        }
    };

    Ok(Transport::tls(ca, client_auth, None))
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("Failed to read '{}': {}", path.display(), e)))
}

/// Create a client and drive its event loop until the broker acknowledges the
/// connection.
///
/// The returned event loop must keep being polled by the caller; requests made
/// through the client are only flushed while it is.
pub async fn connect(options: MqttOptions, timeout: Duration) -> Result<(AsyncClient, EventLoop)> {
    let broker = options.broker_address();
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(Error::from(e)),
            }
        }
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(())) => {
            tracing::info!(host = %broker.0, port = broker.1, "Connected to MQTT broker");
            Ok((client, eventloop))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Timeout(timeout)),
    }
}
