pub mod client;
pub mod config;
pub mod error;
pub mod mapping;
pub mod protocol;
pub mod schema;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientEvent, ConnectionState, RawOptions, ReconnectPolicy};
pub use config::{BridgeAddress, ClientConfig, ConfigError};
pub use error::ClientError;
pub use mapping::{
    DefaultNaming, FindOptions, InsertOptions, ModelMapper, NamingStrategy, RemoveOptions,
    ResultSet, SnakeCamelNaming, SnakePascalNaming, UpdateOptions,
};
pub use schema::{SchemaCatalog, TableKeys};
