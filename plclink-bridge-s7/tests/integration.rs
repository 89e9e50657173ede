//! Integration tests for the S7 bridge.
//!
//! A fake PLC speaks just enough ISO-on-TCP to answer connection, setup
//! and read requests from an in-memory process image; a small axum app
//! stands in for the InfluxDB write endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use chrono::{FixedOffset, TimeZone};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use plclink_bridge_s7::{
    AcquisitionError, AcquisitionLoop, Area, Connection, Connector, ControllerReader, InfluxConfig,
    InfluxSink, PointDefinition, PointReader, S7BridgeConfig, S7Client, S7Config, S7Error,
    SinkError, SinkFanout, SnapshotSink,
};
use plclink_common::{PointValues, Snapshot};
use plclink_framework::{ReconnectPolicy, ServiceConfig, Shutdown};

// ============================================================================
// Fake PLC
// ============================================================================

#[derive(Clone)]
struct ProcessImage {
    inputs: Vec<u8>,
    outputs: Vec<u8>,
}

impl ProcessImage {
    /// Image of the reference cell: %I0.2 and %I0.0 set, %Q0.1 set,
    /// %Q12.5 set, %I20.4 set.
    fn reference() -> Self {
        let mut inputs = vec![0u8; 21];
        inputs[0] = 0b0000_0101;
        inputs[20] = 0b0001_0000;
        let mut outputs = vec![0u8; 13];
        outputs[0] = 0b0000_0010;
        outputs[12] = 0b0010_0000;
        Self { inputs, outputs }
    }
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 4) as u16;
    let mut frame = vec![0x03, 0x00];
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn ack_data(pdu_ref: [u8; 2], params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt(&payload)
}

async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await.ok()?;
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut frame = header.to_vec();
    frame.resize(len, 0);
    socket.read_exact(&mut frame[4..]).await.ok()?;
    Some(frame)
}

/// Serve one client. After answering `read_limit` read requests, the
/// connection is dropped on the next one.
async fn serve_plc(mut socket: TcpStream, image: ProcessImage, read_limit: usize) {
    let mut reads = 0;

    while let Some(frame) = read_request(&mut socket).await {
        let reply = match frame[5] {
            // COTP connection request
            0xE0 => tpkt(&[
                0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01,
                0x00, 0xC2, 0x02, 0x01, 0x01,
            ]),
            // COTP data
            0xF0 => {
                let pdu_ref = [frame[11], frame[12]];
                match frame[17] {
                    0xF0 => ack_data(pdu_ref, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0], &[]),
                    0x04 => {
                        if reads == read_limit {
                            return;
                        }
                        reads += 1;

                        let area = frame[27];
                        let bit_address = u32::from_be_bytes([0, frame[28], frame[29], frame[30]]);
                        let byte = (bit_address / 8) as usize;
                        let memory = if area == 0x81 { &image.inputs } else { &image.outputs };
                        let item = match memory.get(byte) {
                            Some(value) => vec![0xFF, 0x04, 0x00, 0x08, *value],
                            None => vec![0x0A, 0x00, 0x00, 0x00],
                        };
                        ack_data(pdu_ref, &[0x04, 0x01], &item)
                    }
                    _ => return,
                }
            }
            _ => return,
        };

        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Start a fake PLC accepting any number of connections.
async fn spawn_plc(image: ProcessImage, read_limit: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_plc(socket, image.clone(), read_limit));
        }
    });

    addr
}

fn s7_config(addr: SocketAddr) -> S7Config {
    S7Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        rack: 0,
        slot: 1,
        timeout_ms: 1000,
    }
}

fn reference_points() -> Vec<PointDefinition> {
    S7BridgeConfig::parse("{}").unwrap().acquisition.points
}

// ============================================================================
// Fake InfluxDB
// ============================================================================

#[derive(Debug, Clone)]
struct Write {
    query: HashMap<String, String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Clone)]
struct FakeInflux {
    writes: Arc<Mutex<Vec<Write>>>,
    status: StatusCode,
}

async fn write_handler(
    State(influx): State<FakeInflux>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    influx.writes.lock().unwrap().push(Write {
        query,
        authorization,
        body,
    });
    influx.status
}

async fn spawn_influx(status: StatusCode) -> (InfluxConfig, Arc<Mutex<Vec<Write>>>) {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/v2/write", post(write_handler))
        .with_state(FakeInflux {
            writes: writes.clone(),
            status,
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = InfluxConfig {
        url: format!("http://{addr}/"),
        org: "OT".to_string(),
        bucket: "Historian".to_string(),
        token: "s3cr3t".to_string(),
        measurement: "plc_tags".to_string(),
        timeout_ms: 2000,
    };
    (config, writes)
}

fn snapshot(values: &[(&str, bool)]) -> Snapshot {
    let timestamp = FixedOffset::west_opt(6 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 3, 14, 9, 26, 53)
        .unwrap();
    let values: PointValues = values.iter().map(|(n, v)| (n.to_string(), *v)).collect();
    Snapshot::new(timestamp, values)
}

// ============================================================================
// Controller reads
// ============================================================================

#[tokio::test]
async fn test_reads_reference_points_from_plc() {
    let addr = spawn_plc(ProcessImage::reference(), usize::MAX).await;
    let client = S7Client::connect(&s7_config(addr)).await.unwrap();
    assert_eq!(client.pdu_length(), 240);

    let mut reader = ControllerReader::new(client);
    let values = reader.read(&reference_points()).await;

    let expected: PointValues = [
        ("boton123", true),
        ("y1", false),
        ("y2", true),
        ("sale1", false),
        ("entra1", true),
        ("Tag_e", false),
        ("boton_e", true),
        ("iy3", false),
        ("iy4", true),
    ]
    .into_iter()
    .map(|(n, v)| (n.to_string(), v))
    .collect();
    assert_eq!(values, expected);
    assert!(reader.is_connected());

    reader.close().await;
    assert!(!reader.is_connected());
}

#[tokio::test]
async fn test_bad_points_do_not_abort_cycle() {
    let addr = spawn_plc(ProcessImage::reference(), usize::MAX).await;
    let mut reader = ControllerReader::new(S7Client::connect(&s7_config(addr)).await.unwrap());

    let points = vec![
        PointDefinition::new("boton123", "%I0.2"),
        PointDefinition::new("marker", "%X0.1"),
        PointDefinition::new("beyond_image", "%I200.0"),
        PointDefinition::new("bad_bit", "%Q0.8"),
        PointDefinition::new("entra1", "%Q0.1"),
    ];
    let values = reader.read(&points).await;

    assert_eq!(values.len(), 2);
    assert!(values["boton123"]);
    assert!(values["entra1"]);
    // A rejected item is not a transport failure.
    assert!(reader.is_connected());
}

#[tokio::test]
async fn test_dropped_connection_is_detected() {
    let addr = spawn_plc(ProcessImage::reference(), 2).await;
    let mut reader = ControllerReader::new(S7Client::connect(&s7_config(addr)).await.unwrap());

    let points = vec![
        PointDefinition::new("a", "%I0.0"),
        PointDefinition::new("b", "%I0.1"),
        PointDefinition::new("c", "%I0.2"),
        PointDefinition::new("d", "%Q0.1"),
    ];
    let values = reader.read(&points).await;

    assert_eq!(values.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(!reader.is_connected());
}

/// Accept one client, complete the handshake, then answer the first read
/// with a reply carrying someone else's PDU reference.
async fn spawn_out_of_sync_plc() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        while let Some(frame) = read_request(&mut socket).await {
            let reply = match (frame[5], frame.get(17)) {
                (0xE0, _) => tpkt(&[
                    0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01,
                    0x00, 0xC2, 0x02, 0x01, 0x01,
                ]),
                (0xF0, Some(0xF0)) => ack_data(
                    [frame[11], frame[12]],
                    &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0],
                    &[],
                ),
                (0xF0, Some(0x04)) => {
                    ack_data([0xAB, 0xCD], &[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x08, 0x01])
                }
                _ => return,
            };
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    });

    addr
}

#[tokio::test]
async fn test_out_of_sync_reply_drops_connection() {
    let addr = spawn_out_of_sync_plc().await;
    let mut client = S7Client::connect(&s7_config(addr)).await.unwrap();
    assert!(client.is_connected());

    let result = client.read_area(Area::Input, 0, 1).await;

    assert!(matches!(result, Err(S7Error::Protocol(_))));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(S7Client::connect(&s7_config(addr)).await.is_err());
}

// ============================================================================
// InfluxDB sink
// ============================================================================

#[tokio::test]
async fn test_influx_sink_writes_line_protocol() {
    let (config, writes) = spawn_influx(StatusCode::NO_CONTENT).await;
    let sink = InfluxSink::new(&config).unwrap();

    sink.publish(&snapshot(&[("boton123", true), ("y1", false)]))
        .await
        .unwrap();
    sink.publish(&snapshot(&[])).await.unwrap();

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 1);

    let write = &writes[0];
    assert_eq!(write.query["org"], "OT");
    assert_eq!(write.query["bucket"], "Historian");
    assert_eq!(write.query["precision"], "ns");
    assert_eq!(write.authorization.as_deref(), Some("Token s3cr3t"));

    let lines: Vec<&str> = write.body.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("plc_tags,tag=boton123 value=1i 17419"));
    assert!(lines[1].starts_with("plc_tags,tag=y1 value=0i "));
}

#[tokio::test]
async fn test_influx_sink_reports_rejection() {
    let (config, _writes) = spawn_influx(StatusCode::UNAUTHORIZED).await;
    let sink = InfluxSink::new(&config).unwrap();

    let result = sink.publish(&snapshot(&[("y1", true)])).await;
    assert!(matches!(result, Err(SinkError::Rejected { status: 401, .. })));
}

// ============================================================================
// Acquisition pipeline
// ============================================================================

/// Fake PLC reader + fake InfluxDB sink.
struct BenchConnector {
    s7: S7Config,
    influx: InfluxConfig,
}

#[async_trait]
impl Connector for BenchConnector {
    async fn connect(&self) -> Result<Connection, AcquisitionError> {
        let client = S7Client::connect(&self.s7)
            .await
            .map_err(|e| AcquisitionError::Connection(e.to_string()))?;
        let sink = InfluxSink::new(&self.influx)
            .map_err(|e| AcquisitionError::Connection(e.to_string()))?;
        Ok(Connection::new(
            Box::new(ControllerReader::new(client)),
            SinkFanout::new(vec![Box::new(sink)]),
        ))
    }
}

#[tokio::test]
async fn test_pipeline_survives_plc_drop() {
    // Each connection answers one full cycle, then drops mid-way through the second.
    let points = reference_points();
    let addr = spawn_plc(ProcessImage::reference(), points.len() + 3).await;
    let (influx, writes) = spawn_influx(StatusCode::NO_CONTENT).await;

    let acquisition = AcquisitionLoop::new(
        BenchConnector {
            s7: s7_config(addr),
            influx,
        },
        points,
        Duration::from_millis(20),
        FixedOffset::east_opt(0).unwrap(),
        ReconnectPolicy::fixed(Duration::from_millis(50)),
    );

    let (trigger, shutdown) = Shutdown::channel();
    let task = tokio::spawn(acquisition.run(shutdown));

    tokio::time::timeout(Duration::from_secs(10), async {
        while writes.lock().unwrap().len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline did not resume after the controller dropped");

    trigger.trigger();
    let stats = task.await.unwrap();

    assert!(stats.connects >= 2);
    assert!(stats.connection_losses >= 1);

    let writes = writes.lock().unwrap();
    let full_cycles = writes
        .iter()
        .filter(|w| w.body.lines().count() == 9)
        .count();
    let partial_cycles = writes
        .iter()
        .filter(|w| w.body.lines().count() == 3)
        .count();
    assert!(full_cycles >= 2);
    assert!(partial_cycles >= 1);
    assert!(writes[0].body.contains("plc_tags,tag=boton123 value=1i"));
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s7.json5");
    std::fs::write(
        &path,
        r#"{
            // local broker
            bus: { transport: "mqtt", host: "mosquitto" },
            s7: { host: "192.168.100.10" },
            acquisition: { utc_offset_minutes: -360 },
            influx: { url: "http://influxdb2:8086", org: "OT", bucket: "Historian", token: "t" },
        }"#,
    )
    .unwrap();

    let config = S7BridgeConfig::load(&path).unwrap();
    assert_eq!(config.bus.transport(), "mqtt");
    assert_eq!(config.acquisition.points.len(), 9);
    assert_eq!(config.influx.unwrap().bucket, "Historian");
}

#[test]
fn test_shipped_sample_config_is_valid() {
    let config = S7BridgeConfig::parse(include_str!("../../config/s7.json5")).unwrap();

    assert_eq!(config.acquisition.points, S7BridgeConfig::parse("{}").unwrap().acquisition.points);
    assert_eq!(config.acquisition.utc_offset().local_minus_utc(), -6 * 3600);
    assert!(config.acquisition.invalid_points().is_empty());
}
