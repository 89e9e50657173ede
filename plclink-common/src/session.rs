use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate bus settings into a Zenoh configuration.
pub fn session_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    if !matches!(config.mode.as_str(), "client" | "peer" | "router") {
        return Err(Error::Config(format!(
            "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
            config.mode
        )));
    }

    let mut zenoh_config = zenoh::Config::default();
    insert(&mut zenoh_config, "mode", serde_json::to_string(&config.mode)?)?;
    for (key, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if !endpoints.is_empty() {
            insert(&mut zenoh_config, key, serde_json::to_string(endpoints)?)?;
        }
    }

    Ok(zenoh_config)
}

fn insert(zenoh_config: &mut zenoh::Config, key: &str, value: String) -> Result<()> {
    zenoh_config
        .insert_json5(key, &value)
        .map_err(|e| Error::Config(format!("Invalid Zenoh setting {key}: {e}")))
}

/// Open a session on the local bus.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = session_config(config)?;

    tracing::debug!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );
    let session = zenoh::open(zenoh_config).await?;
    tracing::info!(zid = %session.zid(), "Joined Zenoh bus");

    Ok(session)
}
