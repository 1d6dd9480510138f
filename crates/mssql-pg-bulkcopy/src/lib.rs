//! # mssql-pg-bulkcopy
//!
//! Dependency-ordered bulk copy of a table subset from Microsoft SQL Server
//! to PostgreSQL.
//!
//! A run captures baseline row counts, inspects the source schema, runs a
//! data-quality battery, then for each table (parents first) recreates it on
//! the target and copies its rows in one transaction, verifying the final
//! count against the baseline. Tables whose dependencies did not complete are
//! skipped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_pg_bulkcopy::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_pg_bulkcopy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.execute(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_transferred());
//!     Ok(())
//! }
//! ```

pub mod baseline;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod inspector;
pub mod materialize;
pub mod orchestrator;
pub mod quality;
pub mod transfer;
pub mod typemap;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use baseline::{BaselineCounter, BaselineCounts};
pub use config::{Config, MigrationConfig, QualityConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use inspector::SchemaInspector;
pub use materialize::SchemaMaterializer;
pub use orchestrator::{MigrationPlan, MigrationReport, Orchestrator, RunStatus, TableOutcome};
pub use quality::{QualityChecker, QualityReport};
pub use transfer::{MigrationResult, TableMigrator};
pub use typemap::TypeMapper;
