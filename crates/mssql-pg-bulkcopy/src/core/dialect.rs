//! SQL syntax differences between the engines the migrator talks to.

use crate::error::Result;

use super::identifier::{qualify_mssql, qualify_pg, quote_mssql, quote_pg};

/// SQL dialect of a connected database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Mssql,
    Postgres,
}

impl SqlDialect {
    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::Mssql => "mssql",
            SqlDialect::Postgres => "postgres",
        }
    }

    /// Quote a single identifier.
    pub fn quote_ident(&self, name: &str) -> Result<String> {
        match self {
            SqlDialect::Mssql => quote_mssql(name),
            SqlDialect::Postgres => quote_pg(name),
        }
    }

    /// Qualify a table with its schema.
    pub fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        match self {
            SqlDialect::Mssql => qualify_mssql(schema, table),
            SqlDialect::Postgres => qualify_pg(schema, table),
        }
    }

    /// Row count expression. MSSQL uses COUNT_BIG so the result is always BIGINT.
    pub fn count_expr(&self) -> &'static str {
        match self {
            SqlDialect::Mssql => "COUNT_BIG(*)",
            SqlDialect::Postgres => "COUNT(*)",
        }
    }

    /// Placeholder for the 1-based bind parameter.
    pub fn param_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Mssql => format!("@P{}", index),
            SqlDialect::Postgres => format!("${}", index),
        }
    }

    /// Build `SELECT <count> FROM <table> [alias] [WHERE ...]`.
    pub fn count_query(
        &self,
        schema: &str,
        table: &str,
        alias: Option<&str>,
        predicate: Option<&str>,
    ) -> Result<String> {
        let mut sql = format!("SELECT {} FROM {}", self.count_expr(), self.qualify(schema, table)?);
        if let Some(alias) = alias {
            sql.push(' ');
            sql.push_str(alias);
        }
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        Ok(sql)
    }
}
