//! Per-table extract, transform, load and verify.
//!
//! Rows are read in full from the source, coerced where the target domain is
//! stricter than the source, and written in one target transaction using
//! paged multi-row INSERTs. The transaction commits only after every page has
//! been written, so a table is either fully loaded or left empty.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::baseline::BaselineCounts;
use crate::core::dialect::SqlDialect;
use crate::core::schema::TableSchema;
use crate::core::traits::{InsertStatement, SourceReader, TargetWriter};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// PostgreSQL bind-parameter limit per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Default rows per INSERT statement.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Outcome of migrating one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    /// Reported by the enclosing table entry.
    #[serde(skip_serializing)]
    pub table: String,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Source row count captured before migration.
    pub expected_rows: Option<u64>,
    /// Target row count after commit.
    pub target_rows: Option<u64>,
    pub verified: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Coerce a bit-like value to a strict boolean.
///
/// Accepts `0/1`, `true/false`, `t/f` and `yes/no` (case-insensitive).
pub fn coerce_bool(value: &SqlValue) -> std::result::Result<SqlValue, String> {
    match value {
        SqlValue::Null(_) => Ok(SqlValue::Null(SqlNullType::Bool)),
        SqlValue::Bool(b) => Ok(SqlValue::Bool(*b)),
        SqlValue::I16(n) => int_to_bool(i64::from(*n)),
        SqlValue::I32(n) => int_to_bool(i64::from(*n)),
        SqlValue::I64(n) => int_to_bool(*n),
        SqlValue::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "yes" => Ok(SqlValue::Bool(true)),
            "0" | "false" | "f" | "no" => Ok(SqlValue::Bool(false)),
            _ => Err(format!("cannot interpret {:?} as boolean", s)),
        },
        other => Err(format!("cannot interpret {:?} as boolean", other)),
    }
}

fn int_to_bool(n: i64) -> std::result::Result<SqlValue, String> {
    match n {
        0 => Ok(SqlValue::Bool(false)),
        1 => Ok(SqlValue::Bool(true)),
        _ => Err(format!("cannot interpret {} as boolean", n)),
    }
}

/// Coerce a bit-like value to `0`/`1` for a column that is not BOOLEAN on the target.
pub fn coerce_bit(value: &SqlValue) -> std::result::Result<SqlValue, String> {
    Ok(match coerce_bool(value)? {
        SqlValue::Bool(b) => SqlValue::I16(i16::from(b)),
        _ => SqlValue::Null(SqlNullType::I16),
    })
}

/// Apply per-column coercions to extracted rows.
///
/// `column_types` holds the mapped target type of each column. Bit-like
/// columns become strict booleans when the target is BOOLEAN (or unknown),
/// and `0`/`1` otherwise.
pub fn transform(table: &TableSchema, column_types: &[String], rows: Vec<Row>) -> Result<Vec<Row>> {
    let bit_columns: Vec<(usize, bool)> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_boolean())
        .map(|(i, _)| {
            let to_bool = column_types
                .get(i)
                .map_or(true, |t| t.eq_ignore_ascii_case("BOOLEAN"));
            (i, to_bool)
        })
        .collect();

    if bit_columns.is_empty() {
        return Ok(rows);
    }

    rows.into_iter()
        .map(|mut row| {
            for &(idx, to_bool) in &bit_columns {
                if let Some(value) = row.get_mut(idx) {
                    let coerced = if to_bool {
                        coerce_bool(value)
                    } else {
                        coerce_bit(value)
                    };
                    *value = coerced.map_err(|message| MigrateError::Transform {
                        column: table.columns[idx].name.clone(),
                        message,
                    })?;
                }
            }
            Ok(row)
        })
        .collect()
}

/// Attach the table name to a failure, unless it already carries it.
/// Run-level errors such as a lost connection pass through.
fn table_error(table: &str, e: MigrateError) -> MigrateError {
    match e {
        MigrateError::TableMigration { .. } => e,
        e if e.is_fatal() => e,
        other => MigrateError::table_migration(table, other),
    }
}

/// Rows per statement after clamping to the bind-parameter limit.
pub fn effective_page_size(page_size: usize, columns: usize) -> usize {
    let limit = MAX_BIND_PARAMS / columns.max(1);
    page_size.clamp(1, limit.max(1))
}

/// SQL that moves the SERIAL sequence of `column` past the loaded maximum.
pub fn sequence_reset_sql(schema: &str, table: &str, column: &str) -> Result<String> {
    let dialect = SqlDialect::Postgres;
    let qualified = dialect.qualify(schema, table)?;
    let quoted_column = dialect.quote_ident(column)?;
    Ok(format!(
        "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
        qualified.replace('\'', "''"),
        column.replace('\'', "''"),
        quoted_column,
        qualified
    ))
}

/// Moves one table from source to target.
pub struct TableMigrator<'a> {
    source: &'a dyn SourceReader,
    target: &'a dyn TargetWriter,
    source_schema: &'a str,
    target_schema: &'a str,
    page_size: usize,
    column_types: Vec<String>,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        source: &'a dyn SourceReader,
        target: &'a dyn TargetWriter,
        source_schema: &'a str,
        target_schema: &'a str,
    ) -> Self {
        Self {
            source,
            target,
            source_schema,
            target_schema,
            page_size: DEFAULT_PAGE_SIZE,
            column_types: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Mapped target types of the columns, as created on the target.
    pub fn with_column_types(mut self, column_types: Vec<String>) -> Self {
        self.column_types = column_types;
        self
    }

    /// Migrate `table` and verify the target count against `baseline`.
    ///
    /// `serial_column` names a SERIAL key whose sequence is advanced before commit.
    pub async fn migrate(
        &self,
        table: &TableSchema,
        baseline: &BaselineCounts,
        serial_column: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult> {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let rows = self
            .extract(table)
            .await
            .map_err(|e| table_error(&table.name, e))?;
        let rows_read = rows.len() as u64;
        debug!("{}: extracted {} rows", table.name, rows_read);

        let rows = transform(table, &self.column_types, rows)
            .map_err(|e| table_error(&table.name, e))?;

        self.target
            .begin()
            .await
            .map_err(|e| table_error(&table.name, e))?;

        let load = self.load(table, &rows, serial_column);
        let loaded = tokio::select! {
            result = load => result,
            _ = cancel.cancelled() => Err(MigrateError::Cancelled),
        };

        let rows_written = match loaded {
            Ok(n) => n,
            Err(e) => {
                if let Err(rb) = self.target.rollback().await {
                    warn!("{}: rollback failed: {}", table.name, rb);
                }
                if matches!(e, MigrateError::Cancelled) {
                    warn!("{}: cancelled, transaction rolled back", table.name);
                }
                return Err(table_error(&table.name, e));
            }
        };

        self.target
            .commit()
            .await
            .map_err(|e| table_error(&table.name, e))?;

        let expected_rows = baseline.get(&table.name);
        let target_rows = match self
            .target
            .get_row_count(self.target_schema, &table.target_name())
            .await
        {
            Ok(n) => u64::try_from(n).ok(),
            Err(e) => {
                warn!("{}: could not count target rows: {}", table.name, e);
                None
            }
        };

        let verified = matches!((expected_rows, target_rows), (Some(e), Some(t)) if e == t);
        if verified {
            info!("{}: {} rows migrated and verified", table.name, rows_written);
        } else {
            warn!(
                "{}: row count mismatch (source baseline {:?}, target {:?})",
                table.name, expected_rows, target_rows
            );
        }

        Ok(MigrationResult {
            table: table.name.clone(),
            rows_read,
            rows_written,
            expected_rows,
            target_rows,
            verified,
            duration: start.elapsed(),
        })
    }

    async fn extract(&self, table: &TableSchema) -> Result<Vec<Row>> {
        let dialect = self.source.dialect();
        let columns = table
            .columns
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            dialect.qualify(self.source_schema, &table.name)?
        );
        debug!("{}", sql);

        let result = self.source.query(&sql, &[]).await?;
        if result.columns.len() != table.columns.len() {
            return Err(MigrateError::table_migration(
                &table.name,
                format!(
                    "source returned {} columns, expected {}",
                    result.columns.len(),
                    table.columns.len()
                ),
            ));
        }
        Ok(result.rows)
    }

    async fn load(&self, table: &TableSchema, rows: &[Row], serial_column: Option<&str>) -> Result<u64> {
        let target_table = table.target_name();
        let insert = InsertStatement {
            schema: self.target_schema.to_string(),
            table: target_table.clone(),
            columns: table.columns.iter().map(|c| c.target_name()).collect(),
            column_types: self.column_types.clone(),
        };
        let page_size = effective_page_size(self.page_size, insert.columns.len());
        if page_size != self.page_size {
            debug!("{}: page size clamped to {}", table.name, page_size);
        }

        let written = if rows.is_empty() {
            0
        } else {
            self.target.execute_batch(&insert, rows, page_size).await?
        };

        if let Some(column) = serial_column {
            let sql = sequence_reset_sql(self.target_schema, &target_table, column)?;
            debug!("{}", sql);
            self.target.execute(&sql).await?;
        }

        Ok(written)
    }
}
