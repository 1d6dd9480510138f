//! Identifier validation, quoting and the schema allow-list.
//!
//! SQL identifiers (table names, column names, schema names) cannot be bound as
//! parameters; only values can. Every identifier that ends up in generated SQL
//! therefore passes through this module:
//!
//! 1. It is validated for suspicious content (null bytes, excessive length).
//! 2. Where it comes from configuration (quality checks), it must also be
//!    present in the [`AllowList`] built from inspected source metadata.
//! 3. It is quoted for the dialect it is emitted into.

use std::collections::HashMap;

use crate::error::{MigrateError, Result};

use super::schema::TableSchema;

/// Maximum identifier length.
/// - PostgreSQL: 63 bytes (longer names are truncated, not rejected)
/// - SQL Server: 128 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::InvalidIdentifier(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::InvalidIdentifier(format!(
            "identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Table and column names known from schema inspection.
///
/// Lookups are case-insensitive and return the canonical (source) spelling.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    tables: HashMap<String, (String, Vec<String>)>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an allow-list from inspected tables.
    pub fn from_schemas<'a, I>(schemas: I) -> Self
    where
        I: IntoIterator<Item = &'a TableSchema>,
    {
        let mut list = Self::new();
        for schema in schemas {
            list.insert(schema);
        }
        list
    }

    pub fn insert(&mut self, schema: &TableSchema) {
        self.tables.insert(
            schema.name.to_lowercase(),
            (schema.name.clone(), schema.column_names()),
        );
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_lowercase())
    }

    /// Resolve a table name to its inspected spelling.
    pub fn table(&self, table: &str) -> Result<&str> {
        self.entry(table).map(|(name, _)| name.as_str())
    }

    /// Resolve a column name to its inspected spelling.
    pub fn column(&self, table: &str, column: &str) -> Result<&str> {
        let (_, columns) = self.entry(table)?;
        columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(column))
            .map(String::as_str)
            .ok_or_else(|| {
                MigrateError::InvalidIdentifier(format!(
                    "column {}.{} does not exist in the inspected schema",
                    table, column
                ))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn entry(&self, table: &str) -> Result<&(String, Vec<String>)> {
        self.tables.get(&table.to_lowercase()).ok_or_else(|| {
            MigrateError::InvalidIdentifier(format!("table {} was not inspected", table))
        })
    }
}
