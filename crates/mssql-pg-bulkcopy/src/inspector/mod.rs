//! Source schema inspection.

use tracing::{debug, warn};

use crate::core::schema::{ColumnDescriptor, TableSchema};
use crate::core::traits::SourceReader;
use crate::error::{MigrateError, Result};

/// Reads column and key metadata for planned tables from the source catalog.
pub struct SchemaInspector<'a> {
    source: &'a dyn SourceReader,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(source: &'a dyn SourceReader) -> Self {
        Self { source }
    }

    /// Column metadata for `table`, ordered by ordinal position.
    ///
    /// Never returns an empty list: an unknown table is a schema lookup error.
    pub async fn inspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut columns = self
            .source
            .get_schema(table)
            .await
            .map_err(|e| if e.is_fatal() { e } else { MigrateError::schema_lookup(table, e) })?;

        if columns.is_empty() {
            return Err(MigrateError::schema_lookup(
                table,
                "table not found in source catalog",
            ));
        }

        columns.sort_by_key(|c| c.ordinal_position);
        debug!("{}: {} columns", table, columns.len());
        Ok(columns)
    }

    /// Columns plus declared primary key.
    ///
    /// A failed key lookup is logged and treated as "no key metadata".
    pub async fn inspect_table(&self, table: &str) -> Result<TableSchema> {
        let columns = self.inspect(table).await?;
        let mut schema = TableSchema::new(table, columns);

        match self.source.get_primary_key(table).await {
            Ok(pk) if !pk.is_empty() => {
                if let Some(missing) = pk.iter().find(|k| schema.column(k).is_none()) {
                    warn!(
                        "{}: primary key column {} not among inspected columns, ignoring key metadata",
                        table, missing
                    );
                } else {
                    schema = schema.with_primary_key(pk);
                }
            }
            Ok(_) => {
                schema = schema.with_primary_key(Vec::new());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}: primary key metadata unavailable: {}", table, e);
            }
        }

        Ok(schema)
    }

    /// Inspect every table, keeping per-table failures instead of stopping.
    pub async fn inspect_all(&self, tables: &[String]) -> Vec<(String, Result<TableSchema>)> {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let result = self.inspect_table(table).await;
            if let Err(e) = &result {
                warn!("{}", e);
            }
            results.push((table.clone(), result));
        }
        results
    }
}
