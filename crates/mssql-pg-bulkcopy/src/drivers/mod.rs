//! Database driver implementations of the core traits.
//!
//! - [`mssql`]: SQL Server source reader
//! - [`postgres`]: PostgreSQL target writer
//! - [`common`]: shared utilities (TLS)
//!
//! The engine only sees `dyn SourceReader` and `dyn TargetWriter`, so tests
//! substitute in-memory fakes for both.

pub mod common;
pub mod mssql;
pub mod postgres;

pub use common::TlsBuilder;
pub use mssql::MssqlReader;
pub use postgres::PgWriter;
