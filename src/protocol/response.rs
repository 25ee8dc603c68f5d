use serde::{Deserialize, Serialize};

use super::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectReply {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to `select` and `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReply {
    #[serde(default)]
    pub result: Vec<Document>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to `insert`, `update`, `delete` and `shutdown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
