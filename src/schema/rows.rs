use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::protocol::{Body, Document, Envelope, Nonce, Payload, SelectData};

/// Keyspace holding the database's schema tables.
pub const SYSTEM_SCHEMA: &str = "system_schema";

/// Row of `system_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRow {
    pub keyspace_name: String,
    pub table_name: String,
    pub column_name: String,
    /// `partition_key`, `clustering` or `regular`.
    pub kind: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub clustering_order: Option<String>,
}

/// Row of `system_schema.indexes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub keyspace_name: String,
    pub table_name: String,
    pub index_name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

/// Row of `system_schema.types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRow {
    pub keyspace_name: String,
    pub type_name: String,
    #[serde(default)]
    pub field_names: Vec<String>,
    #[serde(default)]
    pub field_types: Vec<String>,
}

/// The three catalog queries issued after every handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogQuery {
    Columns,
    Indexes,
    Types,
}

impl CatalogQuery {
    pub const ALL: [CatalogQuery; 3] = [
        CatalogQuery::Columns,
        CatalogQuery::Indexes,
        CatalogQuery::Types,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            CatalogQuery::Columns => "columns",
            CatalogQuery::Indexes => "indexes",
            CatalogQuery::Types => "types",
        }
    }

    /// `SELECT * FROM system_schema.<table> WHERE keyspace_name = <keyspace>`.
    pub fn envelope(&self, keyspace: &str, nonce: Nonce) -> Envelope {
        let mut where_clause = Document::new();
        where_clause.insert("keyspace_name".into(), Value::String(keyspace.to_string()));

        Envelope::new(Payload::Select(Body::Request(SelectData {
            where_clause,
            columns: vec![],
            limit: 0,
        })))
        .on_table(SYSTEM_SCHEMA, self.table())
        .with_nonce(nonce)
    }
}

impl fmt::Display for CatalogQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SYSTEM_SCHEMA}.{}", self.table())
    }
}

/// Converts reply rows into typed catalog rows.
pub fn parse_rows<T: DeserializeOwned>(rows: Vec<Document>) -> Result<Vec<T>, serde_json::Error> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)))
        .collect()
}
