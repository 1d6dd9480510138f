//! MSSQL source reader implementation.
//!
//! Implements the `SourceReader` trait using Tiberius with a bb8 connection pool.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::dialect::SqlDialect;
use crate::core::schema::{ColumnDescriptor, ForeignKey};
use crate::core::traits::{CountQuery, SourceReader};
use crate::core::value::{Row, RowSet, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result, Side};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

type TdsClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        // NOTE: tiberius 0.12 exposes no packet-size setter; TDS_MAX_PACKET_SIZE is unused.
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Classify a driver error: I/O failures mean the connection is gone.
fn source_error(e: tiberius::error::Error) -> MigrateError {
    match e {
        tiberius::error::Error::Io { .. } => MigrateError::connection(Side::Source, e),
        other => MigrateError::Source(other),
    }
}

/// MSSQL source reader.
pub struct MssqlReader {
    pool: Pool<TiberiusConnectionManager>,
    schema: String,
}

impl MssqlReader {
    /// Connect with a single pooled connection.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        Self::with_pool_size(config, 1).await
    }

    /// Connect with the given pool size.
    pub async fn with_pool_size(config: &SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::connection(Side::Source, e))?;

        // Fail fast on bad credentials or an unreachable host.
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::connection(Side::Source, e))?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| MigrateError::connection(Side::Source, e))?
                .into_row()
                .await
                .map_err(|e| MigrateError::connection(Side::Source, e))?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(Side::Source, e))
    }

    /// Run a parameterized query and return its first result set.
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        let mut client = self.get_client().await?;
        let mut query = Query::new(sql);
        for param in params {
            bind_value(&mut query, param);
        }

        let mut stream = query.query(&mut client).await.map_err(source_error)?;
        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(source_error)?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut rows = Vec::new();
        for row in stream.into_first_result().await.map_err(source_error)? {
            let values = row
                .into_iter()
                .map(convert_column)
                .collect::<Result<Row>>()?;
            rows.push(values);
        }

        Ok(RowSet::new(columns, rows))
    }
}

#[async_trait]
impl CountQuery for MssqlReader {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Mssql
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn query_count(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        let result = self.fetch(sql, params).await?;
        result
            .scalar()
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| {
                MigrateError::query(Side::Source, format!("count query returned no integer: {}", sql))
            })
    }
}

#[async_trait]
impl SourceReader for MssqlReader {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        let result = self.fetch(sql, params).await?;
        debug!("Fetched {} rows", result.len());
        Ok(result)
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let sql = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                CAST(ORDINAL_POSITION AS INT)
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;
        let params = [
            SqlValue::from(self.schema.as_str()),
            SqlValue::from(table),
        ];
        let result = self.fetch(sql, &params).await?;

        let columns: Vec<ColumnDescriptor> = result
            .rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: text_at(row, 0),
                source_type: text_at(row, 1),
                max_length: row.get(2).and_then(SqlValue::as_i64).map(|n| n as i32),
                nullable: row.get(3).and_then(SqlValue::as_i64) == Some(1),
                ordinal_position: row.get(4).and_then(SqlValue::as_i64).unwrap_or(0) as i32,
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), self.schema, table);
        Ok(columns)
    }

    async fn get_primary_key(&self, table: &str) -> Result<Vec<String>> {
        let sql = r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#;
        let params = [
            SqlValue::from(self.schema.as_str()),
            SqlValue::from(table),
        ];
        let result = self.fetch(sql, &params).await?;
        let key: Vec<String> = result.rows.iter().map(|row| text_at(row, 0)).collect();

        debug!("Primary key for {}.{}: {:?}", self.schema, table, key);
        Ok(key)
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT
                pc.name AS column_name,
                rt.name AS ref_table,
                rc.name AS ref_column
            FROM sys.foreign_key_columns fkc
            JOIN sys.tables pt ON fkc.parent_object_id = pt.object_id
            JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
            JOIN sys.columns pc
                ON fkc.parent_object_id = pc.object_id AND fkc.parent_column_id = pc.column_id
            JOIN sys.tables rt ON fkc.referenced_object_id = rt.object_id
            JOIN sys.columns rc
                ON fkc.referenced_object_id = rc.object_id AND fkc.referenced_column_id = rc.column_id
            WHERE ps.name = @P1 AND pt.name = @P2
            ORDER BY fkc.constraint_object_id, fkc.constraint_column_id
        "#;
        let params = [
            SqlValue::from(self.schema.as_str()),
            SqlValue::from(table),
        ];
        let result = self.fetch(sql, &params).await?;
        let foreign_keys: Vec<ForeignKey> = result
            .rows
            .iter()
            .map(|row| ForeignKey {
                table: table.to_string(),
                column: text_at(row, 0),
                ref_table: text_at(row, 1),
                ref_column: text_at(row, 2),
            })
            .collect();

        debug!(
            "Loaded {} foreign keys for {}.{}",
            foreign_keys.len(),
            self.schema,
            table
        );
        Ok(foreign_keys)
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.get_client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(source_error)?
            .into_row()
            .await
            .map_err(source_error)?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mssql"
    }

    async fn close(&self) {
        // bb8 pool handles cleanup automatically
    }
}

fn text_at(row: &Row, idx: usize) -> String {
    match row.get(idx) {
        Some(SqlValue::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn bind_value<'a>(query: &mut Query<'a>, value: &SqlValue) {
    match value.clone() {
        SqlValue::Null(SqlNullType::Bool) => query.bind(Option::<bool>::None),
        SqlValue::Null(SqlNullType::I16 | SqlNullType::I32) => query.bind(Option::<i32>::None),
        SqlValue::Null(SqlNullType::I64) => query.bind(Option::<i64>::None),
        SqlValue::Null(SqlNullType::F32 | SqlNullType::F64) => query.bind(Option::<f64>::None),
        SqlValue::Null(_) => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::I16(v) => query.bind(v),
        SqlValue::I32(v) => query.bind(v),
        SqlValue::I64(v) => query.bind(v),
        SqlValue::F32(v) => query.bind(v),
        SqlValue::F64(v) => query.bind(v),
        SqlValue::String(v) => query.bind(v),
        SqlValue::Bytes(v) => query.bind(v),
        SqlValue::Uuid(v) => query.bind(v),
        SqlValue::Decimal(v) => query.bind(tiberius::numeric::Numeric::new_with_scale(
            v.mantissa(),
            v.scale() as u8,
        )),
        SqlValue::DateTime(v) => query.bind(v),
        SqlValue::DateTimeOffset(v) => query.bind(v),
        SqlValue::Date(v) => query.bind(v),
        SqlValue::Time(v) => query.bind(v),
    }
}

/// Convert one TDS column value, keeping a type hint on NULL.
fn convert_column(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v
            .map(|n| SqlValue::I16(i16::from(n)))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I16(v) => v.map(SqlValue::I16).unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I32(v) => v.map(SqlValue::I32).unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnData::I64(v) => v.map(SqlValue::I64).unwrap_or(SqlValue::Null(SqlNullType::I64)),
        ColumnData::F32(v) => v.map(SqlValue::F32).unwrap_or(SqlValue::Null(SqlNullType::F32)),
        ColumnData::F64(v) => v.map(SqlValue::F64).unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        ColumnData::String(v) => v
            .map(|s| SqlValue::String(s.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid).unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Bytes(b.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::String(x.into_owned().into_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ref numeric @ ColumnData::Numeric(_) => Decimal::from_sql(numeric)?
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        ref dt @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => NaiveDateTime::from_sql(dt)?
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        ref dto @ ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(dto)?
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
        ref d @ ColumnData::Date(_) => NaiveDate::from_sql(d)?
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        ref t @ ColumnData::Time(_) => NaiveTime::from_sql(t)?
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
    };
    Ok(value)
}
