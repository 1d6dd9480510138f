//! Core abstractions shared by the engine and the drivers.
//!
//! - [`schema`]: table, column and dependency metadata
//! - [`value`]: SQL value representation for rows in flight
//! - [`traits`]: source reader and target writer capabilities
//! - [`identifier`]: identifier validation, quoting and the allow-list
//! - [`dialect`]: per-engine SQL syntax
//!
//! Drivers in `drivers/` implement the traits; everything else in the crate
//! is written against them, so the engine can be tested with in-memory fakes.

pub mod dialect;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use dialect::SqlDialect;
pub use identifier::AllowList;
pub use schema::{ColumnDescriptor, ForeignKey, TableSchema, TableSpec};
pub use traits::{CountQuery, InsertStatement, SourceReader, TargetWriter};
pub use value::{Row, RowSet, SqlNullType, SqlValue};
