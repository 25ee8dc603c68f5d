//! Document mapping.
//!
//! A [`ModelMapper`] turns document operations (get, find, insert, update, remove) on a
//! single table into correlated requests. Attribute names are translated to column names
//! through a [`NamingStrategy`] on the way out and back on the way in. Operations that
//! address rows must cover the table's partition key or one full secondary index tuple,
//! as recorded in the schema catalog.
mod model;
mod naming;
mod result;

pub use model::{
    FindOptions, InsertOptions, KeyMatch, ModelMapper, RemoveOptions, UpdateOptions, resolve_keys,
};
pub use naming::{DefaultNaming, NamingStrategy, RESERVED_WORDS, SnakeCamelNaming, SnakePascalNaming};
pub use result::ResultSet;
