//! Source row counts captured before any target mutation.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::info;

use crate::core::traits::SourceReader;
use crate::error::{MigrateError, Result};

/// Source row count per table, in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineCounts {
    counts: Vec<(String, u64)>,
}

impl BaselineCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, count: u64) {
        let table = table.into();
        match self.counts.iter_mut().find(|(t, _)| *t == table) {
            Some(entry) => entry.1 = count,
            None => self.counts.push((table, count)),
        }
    }

    /// Count for `table`, matched case-insensitively.
    pub fn get(&self, table: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table))
            .map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(t, c)| (t.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, c)| c).sum()
    }
}

impl Serialize for BaselineCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (table, count) in &self.counts {
            map.serialize_entry(table, count)?;
        }
        map.end()
    }
}

/// Captures [`BaselineCounts`] from the source.
pub struct BaselineCounter<'a> {
    source: &'a dyn SourceReader,
    schema: &'a str,
}

impl<'a> BaselineCounter<'a> {
    pub fn new(source: &'a dyn SourceReader, schema: &'a str) -> Self {
        Self { source, schema }
    }

    /// Count every table. The first failure aborts the capture.
    pub async fn capture(&self, tables: &[String]) -> Result<BaselineCounts> {
        let dialect = self.source.dialect();
        let mut counts = BaselineCounts::new();

        for table in tables {
            let sql = dialect
                .count_query(self.schema, table, None, None)
                .map_err(|e| MigrateError::baseline(table, e))?;
            let count = self
                .source
                .query_count(&sql, &[])
                .await
                .map_err(|e| MigrateError::baseline(table, e))?;
            let count = u64::try_from(count)
                .map_err(|_| MigrateError::baseline(table, format!("negative count {}", count)))?;
            info!("Baseline {}: {} rows", table, count);
            counts.insert(table.clone(), count);
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::testing::{customer_row, customers_columns, MockSource};

    fn source() -> MockSource {
        MockSource::new()
            .table(
                "Customers",
                customers_columns(),
                vec![
                    customer_row(1, Some("Ana"), Some("ana@example.com")),
                    customer_row(2, None, None),
                ],
            )
            .table(
                "Categories",
                vec![crate::core::schema::ColumnDescriptor::new("CategoryID", "int", 1)],
                vec![vec![SqlValue::I32(1)]],
            )
    }

    #[tokio::test]
    async fn test_capture_counts_each_table() {
        let source = source();
        let counter = BaselineCounter::new(&source, "dbo");

        let counts = counter
            .capture(&["Categories".to_string(), "Customers".to_string()])
            .await
            .unwrap();

        assert_eq!(counts.get("Categories"), Some(1));
        assert_eq!(counts.get("customers"), Some(2));
        assert_eq!(counts.total(), 3);
        let order: Vec<_> = counts.iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec!["Categories", "Customers"]);
    }

    #[tokio::test]
    async fn test_capture_is_idempotent() {
        let source = source();
        let counter = BaselineCounter::new(&source, "dbo");
        let tables = ["Categories".to_string(), "Customers".to_string()];

        let first = counter.capture(&tables).await.unwrap();
        let second = counter.capture(&tables).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failure_names_table() {
        let source = source();
        let counter = BaselineCounter::new(&source, "dbo");

        let err = counter
            .capture(&["Customers".to_string(), "Products".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::BaselineCapture { ref table, .. } if table == "Products"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut counts = BaselineCounts::new();
        counts.insert("Suppliers", 10);
        counts.insert("Categories", 5);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"Suppliers":10,"Categories":5}"#);
    }
}
