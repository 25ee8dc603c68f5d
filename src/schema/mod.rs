//! Schema introspection.
//!
//! After every handshake the client reads three schema tables (columns, indexes and
//! user-defined types) for its keyspace and derives, per table, the column sets a
//! document operation must supply: the partition key, or one full secondary index
//! tuple.
//!
//! # Derivation
//!
//! - Tables are the distinct `table_name`s of the column rows, except names ending in
//!   `_index`; those are the synthetic tables backing secondary indexes.
//! - Primary keys are the `partition_key` columns of each table, in row order.
//! - An `_index` table row is an index key when the name without the suffix already has
//!   that column as a primary key, or when it is a known index name. Rows are grouped per
//!   index table, attributed to the indexed table through the indexes catalog, and the
//!   `idx_token` bookkeeping column is dropped.
//!
//! Derivation is a pure function of the row sets and their order. Lookups that take the
//! first matching index tuple depend on that order.
mod rows;
mod types;

use indexmap::{IndexMap, IndexSet};
use log::debug;

pub use rows::{CatalogQuery, ColumnRow, IndexRow, SYSTEM_SCHEMA, TypeRow, parse_rows};
pub use types::{NormalizedType, normalize, unwrap_collection};

pub const INDEX_TABLE_SUFFIX: &str = "_index";
pub const INDEX_TOKEN_COLUMN: &str = "idx_token";
const PARTITION_KEY: &str = "partition_key";

/// Key columns of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableKeys {
    pub primary_keys: Vec<String>,
    pub index_keys: Vec<Vec<String>>,
}

/// Field of a user-defined type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTypeField {
    pub name: String,
    pub field_type: NormalizedType,
}

/// Distinct column types found in the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSummary {
    pub primitive: Vec<String>,
    pub custom: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    tables: IndexMap<String, TableKeys>,
    column_types: IndexMap<String, IndexMap<String, NormalizedType>>,
    user_types: IndexMap<String, Vec<UserTypeField>>,
    types: TypeSummary,
}

fn strip_index_suffix(table: &str) -> Option<&str> {
    table.strip_suffix(INDEX_TABLE_SUFFIX)
}

impl SchemaCatalog {
    pub fn derive(columns: &[ColumnRow], indexes: &[IndexRow], types: &[TypeRow]) -> Self {
        let mut tables: IndexMap<String, TableKeys> = IndexMap::new();
        let mut column_types: IndexMap<String, IndexMap<String, NormalizedType>> = IndexMap::new();

        for row in columns {
            if strip_index_suffix(&row.table_name).is_some() {
                continue;
            }
            tables.entry(row.table_name.clone()).or_default();
            column_types
                .entry(row.table_name.clone())
                .or_default()
                .insert(row.column_name.clone(), normalize(&row.column_type));
        }

        let mut primary: IndexSet<(&str, &str)> = IndexSet::new();
        for row in columns {
            if row.kind != PARTITION_KEY || strip_index_suffix(&row.table_name).is_some() {
                continue;
            }
            primary.insert((row.table_name.as_str(), row.column_name.as_str()));
            tables
                .entry(row.table_name.clone())
                .or_default()
                .primary_keys
                .push(row.column_name.clone());
        }

        let mut groups: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for row in columns {
            let Some(stripped) = strip_index_suffix(&row.table_name) else {
                continue;
            };
            let back_reference = primary.contains(&(stripped, row.column_name.as_str()));
            let named_index = indexes.iter().any(|index| index.index_name == stripped);
            if back_reference || named_index {
                groups
                    .entry(row.table_name.as_str())
                    .or_default()
                    .push(&row.column_name);
            }
        }

        for (index_table, keys) in groups {
            let stripped = strip_index_suffix(index_table).unwrap_or(index_table);
            let Some(owner) = indexes.iter().find(|index| index.index_name == stripped) else {
                debug!("index table {index_table} has no owning table, skipping");
                continue;
            };
            let keys: Vec<String> = keys
                .into_iter()
                .filter(|key| *key != INDEX_TOKEN_COLUMN)
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                continue;
            }
            tables
                .entry(owner.table_name.clone())
                .or_default()
                .index_keys
                .push(keys);
        }

        let mut user_types = IndexMap::new();
        for row in types {
            let fields = row
                .field_names
                .iter()
                .zip(&row.field_types)
                .map(|(name, ty)| UserTypeField {
                    name: name.clone(),
                    field_type: normalize(ty),
                })
                .collect();
            user_types.insert(row.type_name.clone(), fields);
        }

        Self {
            tables,
            column_types,
            user_types,
            types: summarize(columns),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableKeys> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableKeys)> {
        self.tables.iter().map(|(name, keys)| (name.as_str(), keys))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&NormalizedType> {
        self.column_types.get(table)?.get(column)
    }

    pub fn user_type(&self, name: &str) -> Option<&[UserTypeField]> {
        self.user_types.get(name).map(Vec::as_slice)
    }

    pub fn type_summary(&self) -> &TypeSummary {
        &self.types
    }
}

fn summarize(columns: &[ColumnRow]) -> TypeSummary {
    let distinct: IndexSet<&str> = columns.iter().map(|row| row.column_type.as_str()).collect();
    let mut summary = TypeSummary::default();
    for raw in distinct {
        match normalize(raw) {
            ty @ NormalizedType::Primitive { .. } => summary.primitive.push(ty.to_string()),
            NormalizedType::Custom(name) => summary.custom.push(name),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table: &str, column: &str, kind: &str, ty: &str) -> ColumnRow {
        ColumnRow {
            keyspace_name: "app".into(),
            table_name: table.into(),
            column_name: column.into(),
            kind: kind.into(),
            column_type: ty.into(),
            position: 0,
            clustering_order: None,
        }
    }

    fn index(table: &str, name: &str) -> IndexRow {
        IndexRow {
            keyspace_name: "app".into(),
            table_name: table.into(),
            index_name: name.into(),
            kind: Some("COMPOSITES".into()),
            options: None,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn single_partition_key() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("users", "email", "regular", "text"),
        ];

        let catalog = SchemaCatalog::derive(&columns, &[], &[]);
        let users = catalog.table("users").unwrap();
        assert_eq!(users.primary_keys, strings(&["user_id"]));
        assert!(users.index_keys.is_empty());
    }

    #[test]
    fn named_index_is_attributed_to_its_table() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("users", "email", "regular", "text"),
            column("users_email_idx_index", "email", "partition_key", "text"),
            column("users_email_idx_index", "idx_token", "clustering", "bigint"),
            column("users_email_idx_index", "user_id", "clustering", "text"),
        ];
        let indexes = vec![index("users", "users_email_idx")];

        let catalog = SchemaCatalog::derive(&columns, &indexes, &[]);
        let users = catalog.table("users").unwrap();
        assert_eq!(users.primary_keys, strings(&["user_id"]));
        assert_eq!(users.index_keys, vec![strings(&["email", "user_id"])]);
        assert!(catalog.table("users_email_idx_index").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn index_only_email_column() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("users_email_idx_index", "email", "partition_key", "text"),
        ];
        let indexes = vec![index("users", "users_email_idx")];

        let catalog = SchemaCatalog::derive(&columns, &indexes, &[]);
        assert_eq!(catalog.table("users").unwrap().index_keys, vec![strings(&["email"])]);
    }

    #[test]
    fn back_reference_without_owner_is_skipped() {
        // "guilds_index" back-references guilds.guild_id, but no index row names "guilds".
        let columns = vec![
            column("guilds", "guild_id", "partition_key", "text"),
            column("guilds_index", "guild_id", "partition_key", "text"),
        ];

        let catalog = SchemaCatalog::derive(&columns, &[], &[]);
        assert!(catalog.table("guilds").unwrap().index_keys.is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn composite_primary_keys_keep_row_order() {
        let columns = vec![
            column("messages", "channel_id", "partition_key", "text"),
            column("messages", "message_id", "clustering", "text"),
            column("messages", "bucket", "partition_key", "text"),
        ];

        let catalog = SchemaCatalog::derive(&columns, &[], &[]);
        assert_eq!(
            catalog.table("messages").unwrap().primary_keys,
            strings(&["channel_id", "bucket"])
        );
    }

    #[test]
    fn multiple_indexes_keep_first_seen_order() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("users_name_idx_index", "name", "partition_key", "text"),
            column("users_email_idx_index", "email", "partition_key", "text"),
        ];
        let indexes = vec![
            index("users", "users_email_idx"),
            index("users", "users_name_idx"),
        ];

        let catalog = SchemaCatalog::derive(&columns, &indexes, &[]);
        assert_eq!(
            catalog.table("users").unwrap().index_keys,
            vec![strings(&["name"]), strings(&["email"])]
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("bans", "guild_id", "partition_key", "text"),
            column("bans", "user_id", "partition_key", "text"),
            column("users_email_idx_index", "email", "partition_key", "text"),
        ];
        let indexes = vec![index("users", "users_email_idx")];

        let a = SchemaCatalog::derive(&columns, &indexes, &[]);
        let b = SchemaCatalog::derive(&columns, &indexes, &[]);
        assert_eq!(a, b);
        assert_eq!(
            a.tables().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["users", "bans"]
        );
    }

    #[test]
    fn column_and_user_types_are_normalized() {
        let columns = vec![
            column("users", "user_id", "partition_key", "text"),
            column("users", "created", "regular", "timestamp"),
            column("users", "tokens", "regular", "list<frozen<tokens_type>>"),
            column("users", "flags", "regular", "bigint"),
        ];
        let types = vec![TypeRow {
            keyspace_name: "app".into(),
            type_name: "tokens_type".into(),
            field_names: strings(&["token_", "created_date"]),
            field_types: strings(&["text", "timestamp"]),
        }];

        let catalog = SchemaCatalog::derive(&columns, &[], &types);
        assert_eq!(
            catalog.column_type("users", "created").unwrap().to_string(),
            "date"
        );
        assert!(catalog.column_type("users", "tokens").unwrap().is_custom());

        let fields = catalog.user_type("tokens_type").unwrap();
        assert_eq!(fields[1].name, "created_date");
        assert_eq!(fields[1].field_type.to_string(), "date");

        let summary = catalog.type_summary();
        assert_eq!(summary.primitive, strings(&["string", "date", "bigint"]));
        assert_eq!(summary.custom, strings(&["tokens_type[]"]));
    }
}
