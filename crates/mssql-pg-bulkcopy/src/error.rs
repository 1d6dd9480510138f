//! Error types for the migration library.

use std::fmt;

use thiserror::Error;

/// Which side of the migration a connection error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad table plan, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target unreachable, or authentication failed.
    #[error("Connection error ({side}): {message}")]
    Connection { side: Side, message: String },

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// A statement was rejected by the source or target database.
    #[error("Query error ({side}): {message}")]
    Query { side: Side, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Table missing from the source catalog, or its metadata query failed.
    #[error("Schema lookup failed for table {table}: {message}")]
    SchemaLookup { table: String, message: String },

    /// A baseline row count could not be captured.
    #[error("Baseline capture failed for table {table}: {message}")]
    BaselineCapture { table: String, message: String },

    /// Target DDL for a table failed and was rolled back.
    #[error("Materialization failed for table {table}: {message}")]
    Materialization { table: String, message: String },

    /// Extract, transform or load failed for a table and was rolled back.
    #[error("Migration failed for table {table}: {message}")]
    TableMigration { table: String, message: String },

    /// Table was not attempted because a dependency did not complete.
    #[error("Table {table} skipped: dependency {dependency} did not complete")]
    SkippedDependency { table: String, dependency: String },

    /// A single quality check could not be executed.
    #[error("Quality check '{check}' failed: {message}")]
    QualityCheck { check: String, message: String },

    /// A value could not be coerced to its target domain.
    #[error("Transform error in column {column}: {message}")]
    Transform { column: String, message: String },

    /// Identifier rejected by validation or absent from the schema allow-list.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error.
    pub fn connection(side: Side, message: impl fmt::Display) -> Self {
        MigrateError::Connection {
            side,
            message: message.to_string(),
        }
    }

    /// Create a Query error.
    pub fn query(side: Side, message: impl fmt::Display) -> Self {
        MigrateError::Query {
            side,
            message: message.to_string(),
        }
    }

    pub fn schema_lookup(table: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::SchemaLookup {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn baseline(table: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::BaselineCapture {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn materialization(table: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::Materialization {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn table_migration(table: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrateError::TableMigration {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that invalidate the whole run rather than one table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection { .. }
                | MigrateError::BaselineCapture { .. }
                | MigrateError::Config(_)
                | MigrateError::Cancelled
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::InvalidIdentifier(_) => 2,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } => 3,
            MigrateError::BaselineCapture { .. } => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
