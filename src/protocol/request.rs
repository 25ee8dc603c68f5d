use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;

use super::Document;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "cassandra".to_string(),
            password: "cassandra".to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Handshake payload. Forwarded to the bridge as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    pub contact_points: Vec<String>,
    pub local_data_center: String,
    pub credentials: Credentials,
    pub keyspace: String,
    #[serde(default = "durable_writes_default")]
    pub durable_writes: bool,
    #[serde(default)]
    pub network_topology_strategy: IndexMap<String, u32>,
}

fn durable_writes_default() -> bool {
    true
}

impl From<&ClientConfig> for ConnectData {
    fn from(config: &ClientConfig) -> Self {
        Self {
            contact_points: config.contact_points.clone(),
            local_data_center: config.local_data_center.clone(),
            credentials: config.credentials.clone(),
            keyspace: config.keyspace.clone(),
            durable_writes: config.durable_writes,
            network_topology_strategy: config.network_topology_strategy.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectData {
    #[serde(rename = "where")]
    pub where_clause: Document,
    #[serde(default)]
    pub columns: Vec<String>,
    /// `0` means no limit.
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertData {
    pub columns: Document,
    #[serde(rename = "ifNotExists", default)]
    pub if_not_exists: bool,
}

/// Columns named in `where` never appear in `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateData {
    #[serde(rename = "where")]
    pub where_clause: Document,
    pub columns: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteData {
    #[serde(rename = "where")]
    pub where_clause: Document,
    /// Restricts the delete to these columns instead of the whole row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub query: String,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownData {
    pub reason: String,
}
