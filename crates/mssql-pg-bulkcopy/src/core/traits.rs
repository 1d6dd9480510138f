//! Capability traits consumed by the migration engine.
//!
//! - [`CountQuery`]: scalar count queries, shared by both sides so quality
//!   checks can run against either database
//! - [`SourceReader`]: reads catalog metadata and rows from the source
//! - [`TargetWriter`]: executes DDL and transactional batched inserts on the target
//!
//! The engine never opens or closes connections itself; drivers own their pools.

use async_trait::async_trait;

use crate::error::Result;

use super::dialect::SqlDialect;
use super::schema::{ColumnDescriptor, ForeignKey};
use super::value::{Row, RowSet, SqlValue};

/// Run a query that returns a single non-negative count.
#[async_trait]
pub trait CountQuery: Send + Sync {
    /// SQL dialect used for identifier quoting and count expressions.
    fn dialect(&self) -> SqlDialect;

    /// Default schema for unqualified table names (e.g., "dbo", "public").
    fn default_schema(&self) -> &str;

    /// Execute `sql` with bound `params` and return the first column of the first row.
    async fn query_count(&self, sql: &str, params: &[SqlValue]) -> Result<i64>;
}

/// Read metadata and data from the source database.
#[async_trait]
pub trait SourceReader: CountQuery {
    /// Execute a query with bound parameters and return every row.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet>;

    /// Column metadata for a table, ordered by ordinal position.
    ///
    /// An unknown table yields an empty list.
    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Declared primary key columns in key order. Empty when the table has none.
    async fn get_primary_key(&self, table: &str) -> Result<Vec<String>>;

    /// Foreign keys declared on a table.
    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    /// Round-trip a trivial query to confirm the connection works.
    async fn ping(&self) -> Result<()>;

    /// Database type identifier (e.g., "mssql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Target table and column list for a batched insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    /// Target column types, parallel to `columns`. Empty when unknown.
    pub column_types: Vec<String>,
}

/// Write schema and data to the target database.
///
/// All statements between [`begin`](TargetWriter::begin) and
/// [`commit`](TargetWriter::commit) or [`rollback`](TargetWriter::rollback)
/// share one transaction.
#[async_trait]
pub trait TargetWriter: CountQuery {
    /// Execute a statement without results and return the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Insert `rows` with multi-row parameterized statements of at most
    /// `page_size` rows each. Returns the number of rows written.
    async fn execute_batch(
        &self,
        insert: &InsertStatement,
        rows: &[Row],
        page_size: usize,
    ) -> Result<u64>;

    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Exact row count of a target table.
    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = self.dialect().count_query(schema, table, None, None)?;
        self.query_count(&sql, &[]).await
    }

    /// Round-trip a trivial query to confirm the connection works.
    async fn ping(&self) -> Result<()>;

    /// Database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}
