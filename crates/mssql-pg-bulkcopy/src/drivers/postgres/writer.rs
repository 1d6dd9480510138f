//! PostgreSQL target writer implementation.
//!
//! Implements the `TargetWriter` trait over deadpool-postgres. Every statement
//! runs on one held connection so `BEGIN`/`COMMIT`/`ROLLBACK` bracket the DDL
//! and inserts issued between them.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::dialect::SqlDialect;
use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::traits::{CountQuery, InsertStatement, TargetWriter};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result, Side};
use crate::transfer::MAX_BIND_PARAMS;

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL target writer.
pub struct PgWriter {
    pool: Pool,
    conn: Mutex<Object>,
    schema: String,
}

impl PgWriter {
    /// Connect to the target and hold one pooled connection.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = match TlsBuilder::new(config.ssl_mode).build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(manager)
            .max_size(1)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        let conn = pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(Side::Target, e))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(Side::Target, e))?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (ssl_mode={})",
            config.host, config.port, config.database, config.ssl_mode
        );

        Ok(Self {
            pool,
            conn: Mutex::new(conn),
            schema: config.schema.clone(),
        })
    }
}

#[async_trait]
impl CountQuery for PgWriter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn query_count(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        let texts: Vec<Option<String>> = params.iter().map(SqlValue::to_text).collect();
        let refs = param_refs(&texts);
        let conn = self.conn.lock().await;
        let row = conn.query_one(sql, &refs).await.map_err(target_error)?;
        row.try_get::<_, i64>(0)
            .map_err(|e| MigrateError::query(Side::Target, e))
    }
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        conn.execute(sql, &[]).await.map_err(target_error)
    }

    async fn execute_batch(
        &self,
        insert: &InsertStatement,
        rows: &[Row],
        page_size: usize,
    ) -> Result<u64> {
        let page_size = page_size
            .max(1)
            .min(MAX_BIND_PARAMS / insert.columns.len().max(1));
        let conn = self.conn.lock().await;

        let mut written = 0u64;
        for page in rows.chunks(page_size) {
            let (sql, params) = build_insert_sql(insert, page)?;
            let refs = param_refs(&params);
            written += conn
                .execute(sql.as_str(), &refs)
                .await
                .map_err(target_error)?;
            debug!(
                "Inserted page of {} rows into {}.{}",
                page.len(),
                insert.schema,
                insert.table
            );
        }
        Ok(written)
    }

    async fn begin(&self) -> Result<()> {
        self.conn
            .lock()
            .await
            .simple_query("BEGIN")
            .await
            .map_err(target_error)?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn
            .lock()
            .await
            .simple_query("COMMIT")
            .await
            .map_err(target_error)?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.conn
            .lock()
            .await
            .simple_query("ROLLBACK")
            .await
            .map_err(target_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .lock()
            .await
            .simple_query("SELECT 1")
            .await
            .map_err(target_error)?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Classify a driver error: a dropped connection halts the run, anything
/// else is a statement failure.
fn target_error(e: tokio_postgres::Error) -> MigrateError {
    let io_failure = std::error::Error::source(&e).is_some_and(|s| s.is::<std::io::Error>());
    if e.is_closed() || io_failure {
        MigrateError::connection(Side::Target, e)
    } else {
        MigrateError::Target(e)
    }
}

fn param_refs(params: &[Option<String>]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// PostgreSQL type a text parameter is cast to for a value kind.
fn sql_cast_for_type(null_type: SqlNullType) -> &'static str {
    match null_type {
        SqlNullType::Bool => "boolean",
        SqlNullType::I16 => "smallint",
        SqlNullType::I32 => "integer",
        SqlNullType::I64 => "bigint",
        SqlNullType::F32 => "real",
        SqlNullType::F64 => "double precision",
        SqlNullType::String => "text",
        SqlNullType::DateTime => "timestamp",
        SqlNullType::DateTimeOffset => "timestamptz",
        SqlNullType::Date => "date",
        SqlNullType::Time => "time",
        SqlNullType::Uuid => "uuid",
        SqlNullType::Decimal => "numeric",
        SqlNullType::Bytes => "bytea",
    }
}

/// Cast for a declared target column type.
///
/// Character types go through `text` so an overlong value is rejected by the
/// column instead of being truncated by an explicit `VARCHAR(n)` cast.
fn sql_cast_for_column(target_type: &str) -> String {
    let base = target_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    match base.as_str() {
        "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "TEXT" => "text".to_string(),
        _ => target_type.to_string(),
    }
}

/// Cast per column: the declared target type when known, else the kind of
/// the first non-NULL value, else the NULL hint of the first row.
fn column_casts(insert: &InsertStatement, rows: &[Row]) -> Vec<String> {
    (0..insert.columns.len())
        .map(|col| {
            if let Some(target_type) = insert.column_types.get(col).filter(|t| !t.is_empty()) {
                return sql_cast_for_column(target_type);
            }
            let kind = rows
                .iter()
                .filter_map(|r| r.get(col))
                .find(|v| !v.is_null())
                .or_else(|| rows.first().and_then(|r| r.get(col)))
                .map(SqlValue::null_type)
                .unwrap_or(SqlNullType::String);
            sql_cast_for_type(kind).to_string()
        })
        .collect()
}

/// Build one multi-row INSERT with text parameters cast to each column's type.
fn build_insert_sql(insert: &InsertStatement, rows: &[Row]) -> Result<(String, Vec<Option<String>>)> {
    let width = insert.columns.len();
    let col_list = insert
        .columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let casts = column_casts(insert, rows);

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params = Vec::with_capacity(rows.len() * width);
    for (r, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(MigrateError::table_migration(
                &insert.table,
                format!("row {} has {} values for {} columns", r, row.len(), width),
            ));
        }
        let row_placeholders: Vec<String> = casts
            .iter()
            .enumerate()
            .map(|(c, cast)| format!("${}::text::{}", r * width + c + 1, cast))
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));
        params.extend(row.iter().map(SqlValue::to_text));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualify_pg(&insert.schema, &insert.table)?,
        col_list,
        placeholders.join(", ")
    );
    Ok((sql, params))
}
