//! Target table creation.
//!
//! Each table is rebuilt from scratch: `DROP TABLE IF EXISTS … CASCADE` and
//! `CREATE TABLE` run in one target transaction, so a failed CREATE leaves the
//! previous table in place.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PrimaryKeyStrategy;
use crate::core::dialect::SqlDialect;
use crate::core::schema::{ColumnDescriptor, TableSchema};
use crate::core::traits::TargetWriter;
use crate::error::{MigrateError, Result};
use crate::typemap::TypeMapper;

/// How the target primary key was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Taken from source key metadata.
    Declared,
    /// First column named `*id` with an integer type.
    Heuristic,
    /// No primary key.
    None,
}

/// Statements that rebuild one target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl {
    pub drop: String,
    pub create: String,
    pub key: KeySource,
    /// Target name of the auto-increment key column, if any.
    pub serial_column: Option<String>,
    /// Mapped target type of each column, in ordinal order.
    pub column_types: Vec<String>,
}

/// Chosen key before rendering.
enum KeyPlan {
    Serial(usize),
    Constraint(Vec<String>),
    Nothing,
}

fn serial_type(column: &ColumnDescriptor) -> &'static str {
    if column.source_type.eq_ignore_ascii_case("bigint") {
        "BIGSERIAL"
    } else {
        "SERIAL"
    }
}

fn heuristic_key(table: &TableSchema) -> Option<usize> {
    let first = table.columns.first()?;
    (first.name.to_lowercase().ends_with("id") && first.is_integer()).then_some(0)
}

fn choose_key(table: &TableSchema, strategy: PrimaryKeyStrategy) -> (KeyPlan, KeySource) {
    match strategy {
        PrimaryKeyStrategy::None => (KeyPlan::Nothing, KeySource::None),
        PrimaryKeyStrategy::Heuristic => match heuristic_key(table) {
            Some(idx) => (KeyPlan::Serial(idx), KeySource::Heuristic),
            None => (KeyPlan::Nothing, KeySource::None),
        },
        PrimaryKeyStrategy::Metadata => match &table.primary_key {
            Some(pk) if pk.is_empty() => (KeyPlan::Nothing, KeySource::None),
            Some(pk) => {
                let single = match pk.as_slice() {
                    [only] => table
                        .columns
                        .iter()
                        .position(|c| c.name.eq_ignore_ascii_case(only) && c.is_integer()),
                    _ => None,
                };
                match single {
                    Some(idx) => (KeyPlan::Serial(idx), KeySource::Declared),
                    None => (KeyPlan::Constraint(pk.clone()), KeySource::Declared),
                }
            }
            None => match heuristic_key(table) {
                Some(idx) => (KeyPlan::Serial(idx), KeySource::Heuristic),
                None => (KeyPlan::Nothing, KeySource::None),
            },
        },
    }
}

/// Render DROP and CREATE statements for `table` in the target schema.
///
/// Column order follows ordinal position; identifiers are lowercased and quoted.
pub fn build_ddl(
    target_schema: &str,
    table: &TableSchema,
    mapper: &TypeMapper,
    strategy: PrimaryKeyStrategy,
) -> Result<TableDdl> {
    let dialect = SqlDialect::Postgres;
    let qualified = dialect.qualify(target_schema, &table.target_name())?;
    let (plan, key) = choose_key(table, strategy);

    let mut defs = Vec::with_capacity(table.columns.len() + 1);
    let mut serial_column = None;
    let column_types: Vec<String> = table.columns.iter().map(|c| mapper.map_column(c)).collect();
    for (idx, col) in table.columns.iter().enumerate() {
        let name = dialect.quote_ident(&col.target_name())?;
        let def = match plan {
            KeyPlan::Serial(key_idx) if key_idx == idx => {
                serial_column = Some(col.target_name());
                format!("{} {} PRIMARY KEY", name, serial_type(col))
            }
            _ => {
                let not_null = if col.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", name, column_types[idx], not_null)
            }
        };
        defs.push(def);
    }

    if let KeyPlan::Constraint(cols) = &plan {
        let quoted = cols
            .iter()
            .map(|c| dialect.quote_ident(&c.to_lowercase()))
            .collect::<Result<Vec<_>>>()?;
        defs.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
    }

    Ok(TableDdl {
        drop: format!("DROP TABLE IF EXISTS {} CASCADE", qualified),
        create: format!("CREATE TABLE {} ({})", qualified, defs.join(", ")),
        key,
        serial_column,
        column_types,
    })
}

/// Attach the table name to a DDL failure. Run-level errors pass through.
fn materialization_error(table: &str, e: MigrateError) -> MigrateError {
    if e.is_fatal() {
        e
    } else {
        MigrateError::materialization(table, e)
    }
}

/// Drops and recreates target tables.
pub struct SchemaMaterializer<'a> {
    target: &'a dyn TargetWriter,
    mapper: &'a TypeMapper,
    schema: &'a str,
    strategy: PrimaryKeyStrategy,
}

impl<'a> SchemaMaterializer<'a> {
    pub fn new(
        target: &'a dyn TargetWriter,
        mapper: &'a TypeMapper,
        schema: &'a str,
        strategy: PrimaryKeyStrategy,
    ) -> Self {
        Self {
            target,
            mapper,
            schema,
            strategy,
        }
    }

    /// Rebuild the target table for `table` inside one transaction.
    pub async fn materialize(&self, table: &TableSchema) -> Result<TableDdl> {
        let ddl = build_ddl(self.schema, table, self.mapper, self.strategy)
            .map_err(|e| MigrateError::materialization(&table.name, e))?;

        match ddl.key {
            KeySource::Heuristic => warn!(
                "{}: no key metadata, promoted first column {} to SERIAL PRIMARY KEY by name",
                table.name,
                ddl.serial_column.as_deref().unwrap_or_default()
            ),
            KeySource::None => info!("{}: created without primary key", table.name),
            KeySource::Declared => {}
        }

        self.target
            .begin()
            .await
            .map_err(|e| materialization_error(&table.name, e))?;

        if let Err(e) = self.apply(&ddl).await {
            if let Err(rb) = self.target.rollback().await {
                warn!("{}: rollback after failed DDL also failed: {}", table.name, rb);
            }
            return Err(materialization_error(&table.name, e));
        }

        self.target
            .commit()
            .await
            .map_err(|e| materialization_error(&table.name, e))?;

        info!("Created table {}.{}", self.schema, table.target_name());
        Ok(ddl)
    }

    async fn apply(&self, ddl: &TableDdl) -> Result<()> {
        debug!("{}", ddl.drop);
        self.target.execute(&ddl.drop).await?;
        debug!("{}", ddl.create);
        self.target.execute(&ddl.create).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Side;
    use crate::testing::{customers_columns, MemoryTarget};

    fn customers() -> TableSchema {
        TableSchema::new(
            "Customers",
            vec![
                ColumnDescriptor::new("CustomerID", "int", 1),
                ColumnDescriptor::new("CustomerName", "nvarchar", 2),
            ],
        )
    }

    #[test]
    fn test_heuristic_promotes_first_id_column() {
        let ddl = build_ddl(
            "public",
            &customers(),
            &TypeMapper::default(),
            PrimaryKeyStrategy::Metadata,
        )
        .unwrap();

        assert_eq!(ddl.drop, "DROP TABLE IF EXISTS \"public\".\"customers\" CASCADE");
        assert_eq!(
            ddl.create,
            "CREATE TABLE \"public\".\"customers\" (\"customerid\" SERIAL PRIMARY KEY, \"customername\" VARCHAR)"
        );
        assert_eq!(ddl.key, KeySource::Heuristic);
        assert_eq!(ddl.serial_column.as_deref(), Some("customerid"));
    }

    #[test]
    fn test_heuristic_requires_integer_type() {
        let table = TableSchema::new(
            "Orders",
            vec![
                ColumnDescriptor::new("OrderGuid", "uniqueidentifier", 1),
                ColumnDescriptor::new("Paid", "bit", 2),
            ],
        );
        let ddl = build_ddl("public", &table, &TypeMapper::default(), PrimaryKeyStrategy::Heuristic)
            .unwrap();
        assert_eq!(ddl.key, KeySource::None);
        assert_eq!(
            ddl.create,
            "CREATE TABLE \"public\".\"orders\" (\"orderguid\" TEXT, \"paid\" BOOLEAN)"
        );

        let table = TableSchema::new("Points", vec![ColumnDescriptor::new("GridId", "point", 1)]);
        let ddl = build_ddl("public", &table, &TypeMapper::default(), PrimaryKeyStrategy::Heuristic)
            .unwrap();
        assert_eq!(ddl.key, KeySource::None);
    }

    #[test]
    fn test_declared_key_wins_over_heuristic() {
        let table = TableSchema::new(
            "OrderLines",
            vec![
                ColumnDescriptor::new("LineId", "int", 1).not_null(),
                ColumnDescriptor::new("OrderNo", "bigint", 2).not_null(),
            ],
        )
        .with_primary_key(vec!["OrderNo".to_string()]);

        let ddl = build_ddl("public", &table, &TypeMapper::default(), PrimaryKeyStrategy::Metadata)
            .unwrap();
        assert_eq!(ddl.key, KeySource::Declared);
        assert_eq!(
            ddl.create,
            "CREATE TABLE \"public\".\"orderlines\" (\"lineid\" INTEGER NOT NULL, \"orderno\" BIGSERIAL PRIMARY KEY)"
        );
    }

    #[test]
    fn test_composite_key_becomes_constraint() {
        let table = TableSchema::new(
            "ProductSuppliers",
            vec![
                ColumnDescriptor::new("ProductID", "int", 1).not_null(),
                ColumnDescriptor::new("SupplierID", "int", 2).not_null(),
            ],
        )
        .with_primary_key(vec!["ProductID".to_string(), "SupplierID".to_string()]);

        let ddl = build_ddl("public", &table, &TypeMapper::default(), PrimaryKeyStrategy::Metadata)
            .unwrap();
        assert_eq!(ddl.serial_column, None);
        assert!(ddl
            .create
            .ends_with("\"supplierid\" INTEGER NOT NULL, PRIMARY KEY (\"productid\", \"supplierid\"))"));
    }

    #[test]
    fn test_strategy_none_and_declared_absence() {
        let ddl = build_ddl("public", &customers(), &TypeMapper::default(), PrimaryKeyStrategy::None)
            .unwrap();
        assert_eq!(ddl.key, KeySource::None);
        assert!(!ddl.create.contains("PRIMARY KEY"));

        let keyless = customers().with_primary_key(Vec::new());
        let ddl = build_ddl("public", &keyless, &TypeMapper::default(), PrimaryKeyStrategy::Metadata)
            .unwrap();
        assert_eq!(ddl.key, KeySource::None);
    }

    #[test]
    fn test_lengths_and_not_null() {
        let table = TableSchema::new("Customers", customers_columns());
        let ddl = build_ddl("public", &table, &TypeMapper::default(), PrimaryKeyStrategy::None)
            .unwrap();
        assert_eq!(
            ddl.create,
            "CREATE TABLE \"public\".\"customers\" (\"customerid\" INTEGER NOT NULL, \
             \"customername\" VARCHAR(50), \"email\" VARCHAR(100))"
        );
        assert_eq!(ddl.column_types, vec!["INTEGER", "VARCHAR(50)", "VARCHAR(100)"]);
    }

    #[test]
    fn test_column_types_follow_overrides() {
        let table = TableSchema::new(
            "Suppliers",
            vec![
                ColumnDescriptor::new("SupplierID", "int", 1),
                ColumnDescriptor::new("IsActive", "bit", 2),
            ],
        );
        let overrides = [("bit".to_string(), "SMALLINT".to_string())];
        let mapper = TypeMapper::with_overrides(overrides.iter().map(|(k, v)| (k, v)));
        let ddl = build_ddl("public", &table, &mapper, PrimaryKeyStrategy::None).unwrap();
        assert!(ddl.create.contains("\"isactive\" SMALLINT"));
        assert_eq!(ddl.column_types, vec!["INTEGER", "SMALLINT"]);
    }

    #[tokio::test]
    async fn test_materialize_replaces_existing_table() {
        let target = MemoryTarget::new().existing("customers", vec![vec![]]);
        let mapper = TypeMapper::default();
        let materializer =
            SchemaMaterializer::new(&target, &mapper, "public", PrimaryKeyStrategy::Metadata);

        materializer.materialize(&customers()).await.unwrap();

        assert_eq!(target.rows("customers"), Some(vec![]));
        assert!(target.ddl("customers").unwrap().contains("SERIAL PRIMARY KEY"));
        assert!(!target.in_transaction());
        let executed = target.executed();
        assert!(executed[0].starts_with("DROP TABLE IF EXISTS"));
        assert!(executed[1].starts_with("CREATE TABLE"));
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let target = MemoryTarget::new()
            .existing("customers", vec![vec![]])
            .fail_on("CREATE TABLE", "permission denied for schema public");
        let mapper = TypeMapper::default();
        let materializer =
            SchemaMaterializer::new(&target, &mapper, "public", PrimaryKeyStrategy::Metadata);

        let err = materializer.materialize(&customers()).await.unwrap_err();

        assert!(matches!(err, MigrateError::Materialization { ref table, .. } if table == "Customers"));
        // The DROP was undone with the rest of the transaction.
        assert_eq!(target.rows("customers").map(|r| r.len()), Some(1));
        assert_eq!(*target.rollbacks.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lost_connection_is_not_a_table_failure() {
        let target = MemoryTarget::new().disconnect_on("DROP TABLE");
        let mapper = TypeMapper::default();
        let materializer =
            SchemaMaterializer::new(&target, &mapper, "public", PrimaryKeyStrategy::Metadata);

        let err = materializer.materialize(&customers()).await.unwrap_err();

        assert!(matches!(err, MigrateError::Connection { side: Side::Target, .. }));
    }
}
