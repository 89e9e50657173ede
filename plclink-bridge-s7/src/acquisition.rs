//! Acquisition loop: poll the controller, fan snapshots out, reconnect.
//!
//! Two states. DISCONNECTED retries [`Connector::connect`] under the
//! configured [`ReconnectPolicy`]. CONNECTED runs cycles back to back
//! (read, snapshot, fan-out, sleep) until the controller drops or shutdown
//! is requested. Every exit from CONNECTED closes the connection first.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use thiserror::Error;
use tracing::{debug, error, info};

use plclink_common::{BusConfig, Snapshot, connect_publisher};
use plclink_framework::{ReconnectPolicy, Shutdown, connect_with_retry};

use crate::config::{
    InfluxConfig, PointDefinition, S7BridgeConfig, S7Config, SourceKind,
};
use crate::reader::{ControllerReader, PointReader, SyntheticReader};
use crate::s7::S7Client;
use crate::sink::{BusSink, InfluxSink, SinkFanout, SnapshotSink};

/// Errors that send the loop back to DISCONNECTED.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Controller connection lost")]
    ConnectionLost,
}

/// Everything held while CONNECTED.
pub struct Connection {
    pub reader: Box<dyn PointReader>,
    pub sinks: SinkFanout,
}

impl Connection {
    pub fn new(reader: Box<dyn PointReader>, sinks: SinkFanout) -> Self {
        Self { reader, sinks }
    }

    /// Release the controller and every sink.
    pub async fn close(mut self) {
        self.reader.close().await;
        self.sinks.close().await;
    }
}

/// Opens a [`Connection`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, AcquisitionError>;
}

/// Production connector: S7 or synthetic reader, bus sink, optional InfluxDB
/// sink.
pub struct PlantConnector {
    source: SourceKind,
    seed: Option<u64>,
    s7: S7Config,
    bus: BusConfig,
    topic: String,
    client_id: String,
    reconnect: ReconnectPolicy,
    influx: Option<InfluxConfig>,
}

impl PlantConnector {
    pub fn new(config: &S7BridgeConfig) -> Self {
        Self {
            source: config.acquisition.source,
            seed: config.acquisition.seed,
            s7: config.s7.clone(),
            bus: config.bus.clone(),
            topic: config.acquisition.topic.clone(),
            client_id: config.acquisition.client_id.clone(),
            reconnect: config.acquisition.reconnect,
            influx: config.influx.clone(),
        }
    }

    async fn connect_reader(&self) -> Result<Box<dyn PointReader>, AcquisitionError> {
        match self.source {
            SourceKind::S7 => {
                let client = S7Client::connect(&self.s7).await.map_err(|e| {
                    AcquisitionError::Connection(format!(
                        "controller {}:{}: {}",
                        self.s7.host, self.s7.port, e
                    ))
                })?;
                Ok(Box::new(ControllerReader::new(client)))
            }
            SourceKind::Synthetic => {
                info!(seed = ?self.seed, "Using synthetic point source");
                Ok(Box::new(SyntheticReader::new(self.seed)))
            }
        }
    }

    async fn connect_sinks(&self) -> Result<SinkFanout, AcquisitionError> {
        let influx = match &self.influx {
            Some(config) => Some(InfluxSink::new(config).map_err(|e| {
                AcquisitionError::Connection(format!("influx {}: {}", config.url, e))
            })?),
            None => None,
        };

        let publisher = connect_publisher(&self.bus, &self.client_id, self.reconnect)
            .await
            .map_err(|e| {
                AcquisitionError::Connection(format!("{} bus: {}", self.bus.transport(), e))
            })?;
        info!(transport = self.bus.transport(), topic = %self.topic, "Connected to bus");

        let mut sinks: Vec<Box<dyn SnapshotSink>> =
            vec![Box::new(BusSink::new(publisher, self.topic.clone()))];
        if let Some(influx) = influx {
            sinks.push(Box::new(influx));
        }
        Ok(SinkFanout::new(sinks))
    }
}

#[async_trait]
impl Connector for PlantConnector {
    async fn connect(&self) -> Result<Connection, AcquisitionError> {
        let mut reader = self.connect_reader().await?;

        match self.connect_sinks().await {
            Ok(sinks) => Ok(Connection::new(reader, sinks)),
            Err(e) => {
                reader.close().await;
                Err(e)
            }
        }
    }
}

/// Loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Completed cycles (snapshot handed to the sinks).
    pub cycles: u64,
    /// Successful DISCONNECTED to CONNECTED transitions.
    pub connects: u64,
    /// CONNECTED to DISCONNECTED transitions caused by errors.
    pub connection_losses: u64,
}

/// The acquisition state machine.
pub struct AcquisitionLoop<K> {
    connector: K,
    points: Vec<PointDefinition>,
    poll_interval: Duration,
    offset: FixedOffset,
    reconnect: ReconnectPolicy,
    stats: AcquisitionStats,
}

impl AcquisitionLoop<PlantConnector> {
    pub fn from_config(config: &S7BridgeConfig) -> Self {
        Self::new(
            PlantConnector::new(config),
            config.acquisition.points.clone(),
            config.acquisition.poll_interval(),
            config.acquisition.utc_offset(),
            config.acquisition.reconnect,
        )
    }
}

impl<K: Connector> AcquisitionLoop<K> {
    pub fn new(
        connector: K,
        points: Vec<PointDefinition>,
        poll_interval: Duration,
        offset: FixedOffset,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            points,
            poll_interval,
            offset,
            reconnect,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    /// Run until shutdown. Never gives up on the controller.
    pub async fn run(mut self, mut shutdown: Shutdown) -> AcquisitionStats {
        info!(
            points = self.points.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting acquisition loop"
        );

        loop {
            let connector = &self.connector;
            let Some(mut connection) =
                connect_with_retry(&self.reconnect, "controller", &mut shutdown, || {
                    connector.connect()
                })
                .await
            else {
                break;
            };

            self.stats.connects += 1;
            info!(sinks = connection.sinks.len(), "Acquisition connected");

            let outcome = self.run_connected(&mut connection, &mut shutdown).await;
            connection.close().await;

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    self.stats.connection_losses += 1;
                    let delay = self.reconnect.delay_for(1);
                    error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Acquisition interrupted, reconnecting"
                    );
                    if shutdown.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        info!(
            cycles = self.stats.cycles,
            connects = self.stats.connects,
            connection_losses = self.stats.connection_losses,
            "Acquisition loop stopped"
        );
        self.stats
    }

    /// Cycle until an error or shutdown (`Ok`).
    async fn run_connected(
        &mut self,
        connection: &mut Connection,
        shutdown: &mut Shutdown,
    ) -> Result<(), AcquisitionError> {
        loop {
            self.cycle(connection).await?;
            if shutdown.sleep(self.poll_interval).await {
                return Ok(());
            }
        }
    }

    /// One cycle: read every point, build the snapshot, hand it to the sinks.
    ///
    /// A controller that dropped during the read still has its partial
    /// snapshot published; the cycle then fails with
    /// [`AcquisitionError::ConnectionLost`].
    pub async fn cycle(&mut self, connection: &mut Connection) -> Result<Snapshot, AcquisitionError> {
        let timestamp = Utc::now().with_timezone(&self.offset);
        let values = connection.reader.read(&self.points).await;
        let snapshot = Snapshot::new(timestamp, values);

        let delivered = connection.sinks.publish(&snapshot).await;
        self.stats.cycles += 1;
        debug!(
            read = snapshot.len(),
            configured = self.points.len(),
            delivered,
            "Cycle complete"
        );

        if !connection.reader.is_connected() {
            return Err(AcquisitionError::ConnectionLost);
        }
        Ok(snapshot)
    }
}
