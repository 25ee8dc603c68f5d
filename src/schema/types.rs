use std::fmt;

/// A catalog type string reduced to the document-level type it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedType {
    /// One of the known primitives (`date`, `string`, `boolean`, `bigint`, `number`).
    Primitive { name: &'static str, list: bool },
    /// Anything else, typically a user-defined type. Kept as written, `[]` included.
    Custom(String),
}

impl NormalizedType {
    pub fn is_custom(&self) -> bool {
        matches!(self, NormalizedType::Custom(_))
    }
}

impl fmt::Display for NormalizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedType::Primitive { name, list: true } => write!(f, "{name}[]"),
            NormalizedType::Primitive { name, list: false } => f.write_str(name),
            NormalizedType::Custom(name) => f.write_str(name),
        }
    }
}

fn primitive(name: &str) -> Option<&'static str> {
    match name {
        "timestamp" => Some("date"),
        "text" => Some("string"),
        "boolean" => Some("boolean"),
        "bigint" => Some("bigint"),
        "int" => Some("number"),
        _ => None,
    }
}

/// Innermost `frozen<T>` with no further nesting inside `T`.
fn frozen_inner(raw: &str) -> Option<&str> {
    let mut from = 0;
    while let Some(at) = raw[from..].find("frozen<") {
        let start = from + at + "frozen<".len();
        let rest = &raw[start..];
        match rest.find(['<', '>']) {
            Some(end) if end > 0 && rest.as_bytes()[end] == b'>' => return Some(&rest[..end]),
            _ => from = start,
        }
    }
    None
}

/// Unwraps `frozen<T>` and `list<T>` to `T[]`; every other string is left as is.
pub fn unwrap_collection(raw: &str) -> String {
    if let Some(inner) = frozen_inner(raw) {
        return format!("{inner}[]");
    }

    if raw.starts_with("list<") {
        return format!("{}[]", raw.replacen("list<", "", 1).replacen('>', "", 1));
    }

    raw.to_string()
}

pub fn normalize(raw: &str) -> NormalizedType {
    let unwrapped = unwrap_collection(raw);
    let list = unwrapped.ends_with("[]");
    let base = unwrapped.replacen("[]", "", 1);

    match primitive(&base) {
        Some(name) => NormalizedType::Primitive { name, list },
        None => NormalizedType::Custom(unwrapped),
    }
}
