//! Type mapping between MSSQL and PostgreSQL.

use std::collections::BTreeMap;

use crate::core::schema::ColumnDescriptor;

/// Target type used when a source type has no entry.
pub const FALLBACK_TYPE: &str = "TEXT";

/// Default MSSQL → PostgreSQL table.
const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    // Integer types
    ("int", "INTEGER"),
    ("bigint", "BIGINT"),
    ("smallint", "SMALLINT"),
    ("tinyint", "SMALLINT"),
    // Boolean
    ("bit", "BOOLEAN"),
    // Decimal/numeric
    ("decimal", "NUMERIC"),
    ("numeric", "NUMERIC"),
    ("money", "NUMERIC(19,4)"),
    ("smallmoney", "NUMERIC(10,4)"),
    // Floating point
    ("float", "DOUBLE PRECISION"),
    ("real", "REAL"),
    // Date/time types
    ("datetime", "TIMESTAMP"),
    ("datetime2", "TIMESTAMP"),
    ("smalldatetime", "TIMESTAMP"),
    ("date", "DATE"),
    ("time", "TIME"),
    // String types
    ("char", "CHAR"),
    ("nchar", "CHAR"),
    ("varchar", "VARCHAR"),
    ("nvarchar", "VARCHAR"),
    ("text", "TEXT"),
    ("ntext", "TEXT"),
];

/// Upper bound PostgreSQL accepts for `VARCHAR(n)` / `CHAR(n)`.
const MAX_PG_CHAR_LENGTH: i32 = 10_485_760;

/// Immutable source-type → target-type lookup.
///
/// Keys are normalized to lowercase once at construction, so lookups are
/// pure and case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapper {
    mappings: BTreeMap<String, String>,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAPPINGS
                .iter()
                .map(|(s, t)| (s.to_string(), t.to_string())),
        )
    }
}

impl TypeMapper {
    /// Build a mapper from an explicit table.
    pub fn new<I>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(s, t)| (s.trim().to_lowercase(), t))
                .collect(),
        }
    }

    /// Default table with additional entries; overrides win over defaults.
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut mapper = Self::default();
        for (source, target) in overrides {
            mapper
                .mappings
                .insert(source.trim().to_lowercase(), target.clone());
        }
        mapper
    }

    /// Map a source type name to its target type, falling back to `TEXT`.
    pub fn map_type(&self, source_type: &str) -> &str {
        self.mappings
            .get(source_type.trim().to_lowercase().as_str())
            .map(String::as_str)
            .unwrap_or(FALLBACK_TYPE)
    }

    /// Map a column, carrying its declared length onto bounded character types.
    pub fn map_column(&self, column: &ColumnDescriptor) -> String {
        let base = self.map_type(&column.source_type);
        match (base, column.max_length) {
            ("VARCHAR" | "CHAR", Some(len)) if len > 0 && len <= MAX_PG_CHAR_LENGTH => {
                format!("{}({})", base, len)
            }
            _ => base.to_string(),
        }
    }

    /// Whether `source_type` has an explicit entry.
    pub fn is_mapped(&self, source_type: &str) -> bool {
        self.mappings
            .contains_key(source_type.trim().to_lowercase().as_str())
    }

    /// All entries in lexical order of source type.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.mappings.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }
}
