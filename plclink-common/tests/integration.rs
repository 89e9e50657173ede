//! Integration tests for plclink-common.

use chrono::{FixedOffset, TimeZone};
use plclink_common::{BusConfig, BusEnvelope, LoggingConfig, PointValues, Snapshot};
use serde::Deserialize;

#[test]
fn test_snapshot_to_bus_envelope_json() {
    let timestamp = FixedOffset::west_opt(6 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 6, 2, 14, 5, 0)
        .unwrap();

    let mut values = PointValues::new();
    values.insert("boton123".to_string(), true);
    values.insert("y1".to_string(), false);

    let snapshot = Snapshot::new(timestamp, values);
    let bytes = snapshot.to_envelope().encode().expect("encode failed");

    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "timestamp": "2025-06-02T14:05:00.000000-06:00",
            "values": { "boton123": true, "y1": false }
        })
    );

    let decoded: BusEnvelope = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, snapshot.to_envelope());
}

#[test]
fn test_empty_snapshot_still_has_values_object() {
    let timestamp = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .unwrap();
    let bytes = Snapshot::new(timestamp, PointValues::new())
        .to_envelope()
        .encode()
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["values"], serde_json::json!({}));
}

#[derive(Debug, Deserialize)]
struct ServiceFile {
    bus: BusConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_service_file_with_mqtt_bus() {
    let config: ServiceFile = json5::from_str(
        r#"{
            // local Mosquitto
            bus: { transport: "mqtt", host: "mosquitto", port: 1884 },
            logging: { level: "warn" },
        }"#,
    )
    .unwrap();

    assert_eq!(config.bus.transport(), "mqtt");
    assert_eq!(config.logging.level, "warn");
    assert!(config.bus.validate().is_ok());
}

#[test]
fn test_unknown_transport_rejected() {
    let result: Result<ServiceFile, _> = json5::from_str(r#"{ bus: { transport: "amqp" } }"#);
    assert!(result.is_err());
}
