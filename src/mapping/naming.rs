use serde_json::Value;

use crate::protocol::Document;

/// CQL words that cannot be used as bare column names.
pub const RESERVED_WORDS: &[&str] = &[
    "add", "allow", "alter", "and", "apply", "asc", "authorize", "batch", "begin", "by",
    "columnfamily", "create", "delete", "desc", "describe", "drop", "entries", "execute", "from",
    "full", "grant", "if", "in", "index", "infinity", "insert", "into", "keyspace", "limit",
    "modify", "nan", "norecursive", "not", "null", "of", "on", "or", "order", "primary", "rename",
    "replace", "revoke", "schema", "select", "set", "table", "to", "token", "truncate", "unlogged",
    "update", "use", "using", "view", "where", "with",
];

/// Maps document attribute names to column names and back.
///
/// Implementations must be total and side-effect free. The object helpers walk nested
/// objects and arrays, renaming every key; scalar values (timestamps included, which
/// travel as strings) pass through untouched.
pub trait NamingStrategy: Send + Sync {
    fn column_name(&self, property: &str) -> String;

    fn property_name(&self, column: &str) -> String;

    fn object_to_columns(&self, value: &Value) -> Value {
        rename_keys(value, &|key| self.column_name(key))
    }

    fn object_to_properties(&self, value: &Value) -> Value {
        rename_keys(value, &|key| self.property_name(key))
    }

    fn document_to_columns(&self, doc: &Document) -> Document {
        doc.iter()
            .map(|(key, value)| (self.column_name(key), self.object_to_columns(value)))
            .collect()
    }

    fn document_to_properties(&self, doc: &Document) -> Document {
        doc.iter()
            .map(|(key, value)| (self.property_name(key), self.object_to_properties(value)))
            .collect()
    }
}

fn rename_keys(value: &Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (rename(key), rename_keys(value, rename)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| rename_keys(v, rename)).collect()),
        scalar => scalar.clone(),
    }
}

/// Column names are used as attribute names verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNaming;

impl NamingStrategy for DefaultNaming {
    fn column_name(&self, property: &str) -> String {
        property.to_string()
    }

    fn property_name(&self, column: &str) -> String {
        column.to_string()
    }
}

/// `userId` / `UserId` to `user_id`, suffixing reserved words with `_`.
fn to_snake(property: &str) -> String {
    let mut out = String::with_capacity(property.len() + 4);
    for (i, c) in property.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
    }

    if RESERVED_WORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `user_id` columns as `userId` attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCamelNaming;

impl NamingStrategy for SnakeCamelNaming {
    fn column_name(&self, property: &str) -> String {
        to_snake(property)
    }

    fn property_name(&self, column: &str) -> String {
        column
            .split('_')
            .enumerate()
            .map(|(i, word)| if i == 0 { word.to_string() } else { capitalize(word) })
            .collect()
    }
}

/// `user_id` columns as `UserId` attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakePascalNaming;

impl NamingStrategy for SnakePascalNaming {
    fn column_name(&self, property: &str) -> String {
        to_snake(property)
    }

    fn property_name(&self, column: &str) -> String {
        column.split('_').map(capitalize).collect()
    }
}
