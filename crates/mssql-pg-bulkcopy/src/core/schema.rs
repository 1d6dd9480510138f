//! Schema and metadata types for tables, columns and table dependencies.

use serde::{Deserialize, Serialize};

/// Integer type names eligible for `SERIAL` promotion.
const INTEGER_FAMILY: &[&str] = &["int", "integer", "bigint", "smallint", "tinyint"];

/// Bit-like type names whose values are coerced to strict booleans.
const BOOLEAN_FAMILY: &[&str] = &["bit", "boolean", "bool"];

/// Column metadata as read from the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as declared in the source.
    pub name: String,

    /// Source data type (e.g., "int", "nvarchar", "datetime2").
    pub source_type: String,

    /// Maximum character length for string types (-1 for MAX).
    pub max_length: Option<i32>,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Ordinal position (1-based).
    pub ordinal_position: i32,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            max_length: None,
            nullable: true,
            ordinal_position: ordinal,
        }
    }

    pub fn with_max_length(mut self, len: i32) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Target identifier (source name folded to lowercase).
    pub fn target_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Check if the source type is an integer type.
    pub fn is_integer(&self) -> bool {
        let t = self.source_type.to_lowercase();
        INTEGER_FAMILY.contains(&t.as_str())
    }

    /// Check if the source type is a logical boolean.
    pub fn is_boolean(&self) -> bool {
        let t = self.source_type.to_lowercase();
        BOOLEAN_FAMILY.contains(&t.as_str())
    }
}

/// Inspected table: ordered columns plus declared key, if the source exposes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name as declared in the migration plan.
    pub name: String,

    /// Columns sorted by ordinal position.
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key columns from source metadata. `None` when unavailable.
    pub primary_key: Option<Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, mut columns: Vec<ColumnDescriptor>) -> Self {
        columns.sort_by_key(|c| c.ordinal_position);
        Self {
            name: name.into(),
            columns,
            primary_key: None,
        }
    }

    pub fn with_primary_key(mut self, pk: Vec<String>) -> Self {
        self.primary_key = Some(pk);
        self
    }

    /// Target table identifier.
    pub fn target_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Find a column by name, ignoring case.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Source column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Foreign key relationship between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing table.
    pub table: String,

    /// Referencing column.
    pub column: String,

    /// Referenced (parent) table.
    pub ref_table: String,

    /// Referenced column.
    pub ref_column: String,
}

/// A table in the migration plan and the tables it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_families() {
        assert!(ColumnDescriptor::new("Id", "INT", 1).is_integer());
        assert!(ColumnDescriptor::new("Id", "bigint", 1).is_integer());
        assert!(!ColumnDescriptor::new("Shape", "point", 1).is_integer());
        assert!(!ColumnDescriptor::new("Span", "interval", 1).is_integer());
        assert!(ColumnDescriptor::new("IsActive", "bit", 1).is_boolean());
        assert!(!ColumnDescriptor::new("IsActive", "tinyint", 1).is_boolean());
    }

    #[test]
    fn test_table_schema_sorts_by_ordinal() {
        let table = TableSchema::new(
            "Customers",
            vec![
                ColumnDescriptor::new("Email", "varchar", 3),
                ColumnDescriptor::new("CustomerID", "int", 1),
                ColumnDescriptor::new("CustomerName", "nvarchar", 2),
            ],
        );
        assert_eq!(
            table.column_names(),
            vec!["CustomerID", "CustomerName", "Email"]
        );
        assert_eq!(table.target_name(), "customers");
        assert!(table.column("customername").is_some());
        assert!(table.column("Phone").is_none());
    }

    #[test]
    fn test_table_spec_builder() {
        let spec = TableSpec::new("Products").depends_on(["Categories", "Suppliers"]);
        assert_eq!(spec.depends_on, vec!["Categories", "Suppliers"]);
    }
}
