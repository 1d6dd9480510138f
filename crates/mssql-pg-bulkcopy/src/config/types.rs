//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::schema::TableSpec;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Data-quality checks. When absent the built-in battery is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityConfig>,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username (SQL Server authentication).
    pub user: String,

    /// Password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// TLS mode for the PostgreSQL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS without certificate verification.
    Require,
    /// TLS with certificate chain and hostname verification.
    VerifyFull,
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslMode::Disable => f.write_str("disable"),
            SslMode::Require => f.write_str("require"),
            SslMode::VerifyFull => f.write_str("verify-full"),
        }
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: disable).
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// How the target primary key is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryKeyStrategy {
    /// Declared source key, falling back to the name heuristic when unavailable.
    #[default]
    Metadata,
    /// First column named `*id` with an integer type.
    Heuristic,
    /// Create tables without a primary key.
    None,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables in dependency order.
    #[serde(default)]
    pub tables: Vec<TableSpec>,

    /// Rows per INSERT statement (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Compute the order from `depends_on` instead of trusting list order.
    #[serde(default)]
    pub auto_order: bool,

    /// Merge foreign keys read from the source into the declared dependencies.
    #[serde(default)]
    pub discover_dependencies: bool,

    /// Primary key selection strategy.
    #[serde(default)]
    pub primary_key: PrimaryKeyStrategy,

    /// Treat a row-count mismatch as a failure for dependents.
    #[serde(default)]
    pub strict_verification: bool,

    /// Re-run the quality checks against the target after loading.
    #[serde(default)]
    pub post_checks: bool,

    /// Extra or replacement entries for the type table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_overrides: BTreeMap<String, String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            page_size: default_page_size(),
            auto_order: false,
            discover_dependencies: false,
            primary_key: PrimaryKeyStrategy::default(),
            strict_verification: false,
            post_checks: false,
            type_overrides: BTreeMap::new(),
        }
    }
}

impl MigrationConfig {
    /// Table names in declared order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

/// A check on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCheck {
    pub table: String,
    pub column: String,
    /// Finding text following the count, e.g. "customers with Null names".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A `NOT LIKE` pattern check on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCheck {
    pub table: String,
    pub column: String,
    /// SQL LIKE pattern that valid values match.
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A referential check: every non-NULL `column` must exist in `ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyCheck {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Data-quality check battery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Columns that must not be NULL.
    #[serde(default)]
    pub required: Vec<ColumnCheck>,

    /// Columns whose non-NULL values must match a LIKE pattern.
    #[serde(default)]
    pub patterns: Vec<PatternCheck>,

    /// Columns that must not be negative.
    #[serde(default)]
    pub non_negative: Vec<ColumnCheck>,

    /// Relationships that must not have orphans.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyCheck>,
}

impl QualityConfig {
    /// Number of configured checks.
    pub fn len(&self) -> usize {
        self.required.len() + self.patterns.len() + self.non_negative.len() + self.foreign_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    1000
}
