//! Client configuration.
//!
//! Connection parameters (contact points, data center, keyspace, credentials and
//! replication settings) are not interpreted by the client; they are forwarded to the
//! bridge in the handshake. The remaining fields control where the bridge is reached
//! and how long the client waits for it.
use std::{fs, io, path::Path, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{client::ReconnectPolicy, protocol::Credentials};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration, {0}")]
    Invalid(String),
}

/// Address of the bridging server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeAddress {
    pub host: String,
    pub port: u16,
}

impl Default for BridgeAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9042,
        }
    }
}

impl BridgeAddress {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub contact_points: Vec<String>,
    pub local_data_center: String,
    pub keyspace: String,
    pub credentials: Credentials,
    pub durable_writes: bool,
    /// Replication factor per data center.
    pub network_topology_strategy: IndexMap<String, u32>,
    pub bridge: BridgeAddress,
    /// How long `connect` waits for the handshake acknowledgement.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// How long a request waits for its correlated reply.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            contact_points: vec!["localhost:9042".to_string()],
            local_data_center: "datacenter1".to_string(),
            keyspace: "test".to_string(),
            credentials: Credentials::default(),
            durable_writes: true,
            network_topology_strategy: IndexMap::from([("datacenter1".to_string(), 1)]),
            bridge: BridgeAddress::default(),
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contact_points.is_empty() {
            return Err(ConfigError::Invalid("no contact points".into()));
        }
        if self.keyspace.is_empty() {
            return Err(ConfigError::Invalid("keyspace must not be empty".into()));
        }
        Ok(())
    }
}

/// (De)serializes a [`Duration`] as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
