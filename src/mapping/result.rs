use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::Document;

use super::NamingStrategy;

/// Rows returned by a find, keyed by document attribute names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Document>,
}

impl ResultSet {
    pub(crate) fn from_columns(rows: &[Document], naming: &dyn NamingStrategy) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|row| naming.document_to_properties(row))
                .collect(),
        }
    }

    pub fn first(&self) -> Option<&Document> {
        self.rows.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_vec(self) -> Vec<Document> {
        self.rows
    }

    /// Deserializes every row into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(Value::Object(row.clone())))
            .collect()
    }
}

impl IntoIterator for ResultSet {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
