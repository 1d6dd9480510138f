//! In-memory source and target used by the engine's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::dialect::SqlDialect;
use crate::core::schema::{ColumnDescriptor, ForeignKey};
use crate::core::traits::{CountQuery, InsertStatement, SourceReader, TargetWriter};
use crate::core::value::{Row, RowSet, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result, Side};

/// Extract the unquoted table name that follows `keyword` in `sql`.
fn table_after(sql: &str, keyword: &str) -> Option<String> {
    let idx = sql.find(keyword)? + keyword.len();
    let token = sql[idx..]
        .split(|c: char| c.is_whitespace() || c == '(' || c == ',')
        .find(|t| !t.is_empty())?;
    let last = token.rsplit('.').next()?;
    Some(
        last.trim_matches(|c| c == '"' || c == '[' || c == ']' || c == '\'')
            .to_lowercase(),
    )
}

/// Column names between SELECT and FROM, unquoted.
fn selected_columns(sql: &str) -> Option<Vec<String>> {
    let start = sql.find("SELECT ")? + "SELECT ".len();
    let end = sql.find(" FROM ")?;
    Some(
        sql[start..end]
            .split(',')
            .map(|c| c.trim().trim_matches(|ch| ch == '[' || ch == ']').to_string())
            .collect(),
    )
}

#[derive(Default)]
pub(crate) struct MockSource {
    schemas: HashMap<String, Vec<ColumnDescriptor>>,
    primary_keys: HashMap<String, Vec<String>>,
    foreign_keys: HashMap<String, Vec<ForeignKey>>,
    data: HashMap<String, RowSet>,
    count_rules: Vec<(String, i64)>,
    fail_rules: Vec<(String, String)>,
    disconnect_rules: Vec<String>,
    fail_schema: HashSet<String>,
    fail_primary_key: bool,
    fail_ping: bool,
    pub log: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with its columns and rows.
    pub fn table(mut self, name: &str, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        let names = columns.iter().map(|c| c.name.clone()).collect();
        self.data
            .insert(name.to_lowercase(), RowSet::new(names, rows));
        self.schemas.insert(name.to_lowercase(), columns);
        self
    }

    pub fn primary_key(mut self, table: &str, columns: &[&str]) -> Self {
        self.primary_keys.insert(
            table.to_lowercase(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn foreign_key(mut self, table: &str, column: &str, ref_table: &str, ref_column: &str) -> Self {
        self.foreign_keys
            .entry(table.to_lowercase())
            .or_default()
            .push(ForeignKey {
                table: table.to_string(),
                column: column.to_string(),
                ref_table: ref_table.to_string(),
                ref_column: ref_column.to_string(),
            });
        self
    }

    /// Count queries containing `needle` return `count`.
    pub fn count_rule(mut self, needle: &str, count: i64) -> Self {
        self.count_rules.push((needle.to_string(), count));
        self
    }

    /// Any query containing `needle` fails with `message`.
    pub fn fail_on(mut self, needle: &str, message: &str) -> Self {
        self.fail_rules.push((needle.to_string(), message.to_string()));
        self
    }

    /// Queries containing `needle` fail as if the connection dropped.
    pub fn disconnect_on(mut self, needle: &str) -> Self {
        self.disconnect_rules.push(needle.to_string());
        self
    }

    pub fn fail_schema(mut self, table: &str) -> Self {
        self.fail_schema.insert(table.to_lowercase());
        self
    }

    pub fn fail_primary_key(mut self) -> Self {
        self.fail_primary_key = true;
        self
    }

    pub fn fail_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    pub fn queries(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        if self.disconnect_rules.iter().any(|n| sql.contains(n.as_str())) {
            return Err(MigrateError::connection(Side::Source, "connection reset by peer"));
        }
        for (needle, message) in &self.fail_rules {
            if sql.contains(needle.as_str()) {
                return Err(MigrateError::query(Side::Source, message));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CountQuery for MockSource {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Mssql
    }

    fn default_schema(&self) -> &str {
        "dbo"
    }

    async fn query_count(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        self.record(sql, params)?;
        if let Some((_, count)) = self
            .count_rules
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Ok(*count);
        }
        let table = table_after(sql, "FROM ")
            .ok_or_else(|| MigrateError::query(Side::Source, "unparseable count"))?;
        self.data
            .get(&table)
            .map(|rs| rs.len() as i64)
            .ok_or_else(|| MigrateError::query(Side::Source, format!("Invalid object name '{}'", table)))
    }
}

#[async_trait]
impl SourceReader for MockSource {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        self.record(sql, params)?;
        let table = table_after(sql, "FROM ")
            .ok_or_else(|| MigrateError::query(Side::Source, "unparseable query"))?;
        let data = self
            .data
            .get(&table)
            .ok_or_else(|| MigrateError::query(Side::Source, format!("Invalid object name '{}'", table)))?;
        let wanted = selected_columns(sql).unwrap_or_else(|| data.columns.clone());
        let indices: Vec<usize> = wanted
            .iter()
            .map(|w| {
                data.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(w))
                    .ok_or_else(|| MigrateError::query(Side::Source, format!("Invalid column name '{}'", w)))
            })
            .collect::<Result<_>>()?;
        let rows = data
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(RowSet::new(wanted, rows))
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let key = table.to_lowercase();
        if self.fail_schema.contains(&key) {
            return Err(MigrateError::query(Side::Source, "catalog query timed out"));
        }
        Ok(self.schemas.get(&key).cloned().unwrap_or_default())
    }

    async fn get_primary_key(&self, table: &str) -> Result<Vec<String>> {
        if self.fail_primary_key {
            return Err(MigrateError::query(Side::Source, "permission denied on sys.indexes"));
        }
        Ok(self
            .primary_keys
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        Ok(self
            .foreign_keys
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping {
            return Err(MigrateError::connection(Side::Source, "login failed for user 'sa'"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mock"
    }

    async fn close(&self) {}
}

#[derive(Debug, Clone, Default)]
struct TargetState {
    tables: HashMap<String, Vec<Row>>,
    ddl: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct MemoryTarget {
    state: Mutex<TargetState>,
    snapshot: Mutex<Option<TargetState>>,
    fail_rules: Vec<(String, String)>,
    disconnect_rules: Vec<String>,
    fail_batch_after: HashMap<String, usize>,
    stall_after_first_page: HashSet<String>,
    short_write: HashMap<String, usize>,
    count_rules: Vec<(String, i64)>,
    fail_ping: bool,
    pub statements: Mutex<Vec<String>>,
    pub pages: Mutex<Vec<usize>>,
    pub commits: Mutex<usize>,
    pub rollbacks: Mutex<usize>,
    /// Signalled when an insert stalls.
    pub stalled: Notify,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing committed target table.
    pub fn existing(self, table: &str, rows: Vec<Row>) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table.to_lowercase(), rows);
        self
    }

    /// Statements containing `needle` fail with `message`.
    pub fn fail_on(mut self, needle: &str, message: &str) -> Self {
        self.fail_rules.push((needle.to_string(), message.to_string()));
        self
    }

    /// Statements containing `needle` fail as if the connection dropped.
    pub fn disconnect_on(mut self, needle: &str) -> Self {
        self.disconnect_rules.push(needle.to_string());
        self
    }

    /// Inserting into `table` writes one page, then never completes.
    pub fn stall_after_first_page(mut self, table: &str) -> Self {
        self.stall_after_first_page.insert(table.to_lowercase());
        self
    }

    /// Inserting into `table` fails once `rows` rows have been written.
    pub fn fail_batch_after(mut self, table: &str, rows: usize) -> Self {
        self.fail_batch_after.insert(table.to_lowercase(), rows);
        self
    }

    /// Inserts into `table` silently drop `missing` rows.
    pub fn short_write(mut self, table: &str, missing: usize) -> Self {
        self.short_write.insert(table.to_lowercase(), missing);
        self
    }

    pub fn count_rule(mut self, needle: &str, count: i64) -> Self {
        self.count_rules.push((needle.to_string(), count));
        self
    }

    pub fn fail_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.state.lock().unwrap().tables.get(&table.to_lowercase()).cloned()
    }

    pub fn ddl(&self, table: &str) -> Option<String> {
        self.state.lock().unwrap().ddl.get(&table.to_lowercase()).cloned()
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.lock().unwrap().is_some()
    }

    fn check_fail(&self, sql: &str) -> Result<()> {
        if self.disconnect_rules.iter().any(|n| sql.contains(n.as_str())) {
            return Err(MigrateError::connection(Side::Target, "connection closed"));
        }
        for (needle, message) in &self.fail_rules {
            if sql.contains(needle.as_str()) {
                return Err(MigrateError::query(Side::Target, message));
            }
        }
        Ok(())
    }

    fn write_pages(
        &self,
        insert: &InsertStatement,
        rows: &[Row],
        page_size: usize,
        max_pages: Option<usize>,
    ) -> Result<u64> {
        let key = insert.table.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if !state.tables.contains_key(&key) {
            return Err(MigrateError::query(
                Side::Target,
                format!("relation \"{}\" does not exist", key),
            ));
        }
        let limit = self.fail_batch_after.get(&key).copied();
        let missing = self.short_write.get(&key).copied().unwrap_or(0);
        let mut written = 0u64;
        let pages = rows.chunks(page_size.max(1)).take(max_pages.unwrap_or(usize::MAX));
        for page in pages {
            self.pages.lock().unwrap().push(page.len());
            for row in page {
                if limit.is_some_and(|l| written as usize >= l) {
                    return Err(MigrateError::query(
                        Side::Target,
                        "duplicate key value violates unique constraint",
                    ));
                }
                if row.len() != insert.columns.len() {
                    return Err(MigrateError::query(Side::Target, "column count mismatch"));
                }
                written += 1;
                if written as usize > rows.len().saturating_sub(missing) {
                    continue;
                }
                if let Some(table) = state.tables.get_mut(&key) {
                    table.push(row.clone());
                }
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl CountQuery for MemoryTarget {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn default_schema(&self) -> &str {
        "public"
    }

    async fn query_count(&self, sql: &str, _params: &[SqlValue]) -> Result<i64> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.check_fail(sql)?;
        if let Some((_, count)) = self
            .count_rules
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Ok(*count);
        }
        let table = table_after(sql, "FROM ")
            .ok_or_else(|| MigrateError::query(Side::Target, "unparseable count"))?;
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table)
            .map(|rows| rows.len() as i64)
            .ok_or_else(|| MigrateError::query(Side::Target, format!("relation \"{}\" does not exist", table)))
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn execute(&self, sql: &str) -> Result<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.check_fail(sql)?;
        let mut state = self.state.lock().unwrap();
        if let Some(table) = table_after(sql, "DROP TABLE IF EXISTS ") {
            state.tables.remove(&table);
            state.ddl.remove(&table);
        } else if let Some(table) = table_after(sql, "CREATE TABLE ") {
            state.tables.insert(table.clone(), Vec::new());
            state.ddl.insert(table, sql.to_string());
        }
        Ok(0)
    }

    async fn execute_batch(
        &self,
        insert: &InsertStatement,
        rows: &[Row],
        page_size: usize,
    ) -> Result<u64> {
        let stall = self
            .stall_after_first_page
            .contains(&insert.table.to_lowercase());
        let written = self.write_pages(insert, rows, page_size, stall.then_some(1))?;
        if stall {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(written)
    }

    async fn begin(&self) -> Result<()> {
        let state = self.state.lock().unwrap().clone();
        *self.snapshot.lock().unwrap() = Some(state);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        *self.commits.lock().unwrap() += 1;
        self.snapshot.lock().unwrap().take();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        *self.rollbacks.lock().unwrap() += 1;
        if let Some(snapshot) = self.snapshot.lock().unwrap().take() {
            *self.state.lock().unwrap() = snapshot;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping {
            return Err(MigrateError::connection(Side::Target, "connection refused"));
        }
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

/// Columns and rows for the Customers/Products fixtures used across tests.
pub(crate) fn customers_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("CustomerID", "int", 1).not_null(),
        ColumnDescriptor::new("CustomerName", "nvarchar", 2).with_max_length(50),
        ColumnDescriptor::new("Email", "varchar", 3).with_max_length(100),
    ]
}

pub(crate) fn customer_row(id: i32, name: Option<&str>, email: Option<&str>) -> Row {
    vec![
        SqlValue::I32(id),
        name.map(SqlValue::from)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        email
            .map(SqlValue::from)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    ]
}
