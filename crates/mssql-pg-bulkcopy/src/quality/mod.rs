//! Data-quality checks run against the source before migration and,
//! optionally, against the target afterwards.
//!
//! Checks are advisory: a violation produces a [`QualityFinding`], and a check
//! that cannot run is recorded as a [`CheckFailure`]. Neither stops the run.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ColumnCheck, ForeignKeyCheck, PatternCheck, QualityConfig};
use crate::core::dialect::SqlDialect;
use crate::core::identifier::AllowList;
use crate::core::traits::CountQuery;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// LIKE pattern a plausible email address matches.
pub const EMAIL_PATTERN: &str = "%_@_%._%";

/// The battery the migrator runs when no `quality` section is configured.
pub fn default_checks() -> QualityConfig {
    QualityConfig {
        required: vec![ColumnCheck {
            table: "Customers".into(),
            column: "CustomerName".into(),
            label: Some("customers with Null names".into()),
        }],
        patterns: vec![PatternCheck {
            table: "Customers".into(),
            column: "Email".into(),
            pattern: EMAIL_PATTERN.into(),
            label: Some("emails with invalid email formats".into()),
        }],
        non_negative: vec![
            ColumnCheck {
                table: "Products".into(),
                column: "UnitPrice".into(),
                label: Some("prices contain negative prices".into()),
            },
            ColumnCheck {
                table: "Products".into(),
                column: "StockQuantity".into(),
                label: Some("products contain negative values".into()),
            },
        ],
        foreign_keys: vec![ForeignKeyCheck {
            table: "Products".into(),
            column: "SupplierID".into(),
            ref_table: "Suppliers".into(),
            ref_column: "SupplierID".into(),
            label: Some("products with orphaned foreign keys".into()),
        }],
    }
}

/// Format a count with thousands separators (`1234567` → `"1,234,567"`).
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityFinding {
    pub check: String,
    pub table: String,
    pub count: u64,
    pub message: String,
}

/// A check that could not be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckFailure {
    pub check: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    /// Every check ran and found nothing.
    Clean,
    /// At least one finding; every check ran.
    IssuesFound,
    /// At least one check could not run.
    Incomplete,
    /// No checks were executed.
    NotRun,
}

/// Outcome of a check battery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub findings: Vec<QualityFinding>,
    pub failures: Vec<CheckFailure>,
    pub checks_run: usize,
}

impl QualityReport {
    pub fn status(&self) -> QualityStatus {
        if self.checks_run == 0 && self.failures.is_empty() {
            QualityStatus::NotRun
        } else if !self.failures.is_empty() {
            QualityStatus::Incomplete
        } else if !self.findings.is_empty() {
            QualityStatus::IssuesFound
        } else {
            QualityStatus::Clean
        }
    }

    /// Human-readable lines, one per finding, or a single "no issues" line.
    pub fn lines(&self) -> Vec<String> {
        match self.status() {
            QualityStatus::NotRun => vec!["Data quality checks not run".to_string()],
            QualityStatus::Clean => vec!["No data quality issues identified".to_string()],
            _ => self
                .findings
                .iter()
                .map(|f| format!(" > {}", f.message))
                .chain(
                    self.failures
                        .iter()
                        .map(|f| format!(" ! {} could not run: {}", f.check, f.error)),
                )
                .collect(),
        }
    }
}

/// A check resolved to concrete SQL.
#[derive(Debug, Clone, PartialEq)]
struct PreparedCheck {
    name: String,
    table: String,
    label: String,
    sql: String,
    params: Vec<SqlValue>,
}

/// Runs a [`QualityConfig`] battery against one database.
///
/// Table and column names must be present in the allow-list built from
/// inspection. Against a PostgreSQL target they are lowercased, matching how
/// tables were materialized.
pub struct QualityChecker<'a> {
    checks: &'a QualityConfig,
    allow: &'a AllowList,
}

impl<'a> QualityChecker<'a> {
    pub fn new(checks: &'a QualityConfig, allow: &'a AllowList) -> Self {
        Self { checks, allow }
    }

    /// Run every check in declared order: required, pattern, non-negative, orphan.
    pub async fn run_checks(&self, db: &dyn CountQuery, schema: &str) -> QualityReport {
        let mut report = QualityReport::default();
        let dialect = db.dialect();

        for (name, prepared) in self.prepare(dialect, schema) {
            let check = match prepared {
                Ok(check) => check,
                Err(e) => {
                    warn!("Quality check {} skipped: {}", name, e);
                    report.failures.push(CheckFailure {
                        check: name,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            debug!("{}: {}", check.name, check.sql);
            match run_count(db, &check).await {
                Ok(0) => {
                    report.checks_run += 1;
                }
                Ok(count) => {
                    report.checks_run += 1;
                    let message = format!("{} {}...", format_count(count), check.label);
                    info!("Quality: {}", message);
                    report.findings.push(QualityFinding {
                        check: check.name,
                        table: check.table,
                        count,
                        message,
                    });
                }
                Err(e) => {
                    warn!("Quality check {} failed: {}", check.name, e);
                    report.failures.push(CheckFailure {
                        check: check.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    fn prepare(&self, dialect: SqlDialect, schema: &str) -> Vec<(String, Result<PreparedCheck>)> {
        let mut prepared = Vec::with_capacity(self.checks.len());

        for c in &self.checks.required {
            let name = format!("required:{}.{}", c.table, c.column);
            let label = c
                .label
                .clone()
                .unwrap_or_else(|| format!("rows in {} with NULL {}", c.table, c.column));
            let check = self
                .column_predicate(dialect, schema, &c.table, &c.column, |col| {
                    format!("{} IS NULL", col)
                })
                .map(|(table, sql)| PreparedCheck {
                    name: name.clone(),
                    table,
                    label,
                    sql,
                    params: Vec::new(),
                });
            prepared.push((name, check));
        }

        for c in &self.checks.patterns {
            let name = format!("pattern:{}.{}", c.table, c.column);
            let label = c
                .label
                .clone()
                .unwrap_or_else(|| format!("rows in {} with malformed {}", c.table, c.column));
            let placeholder = dialect.param_placeholder(1);
            let check = self
                .column_predicate(dialect, schema, &c.table, &c.column, |col| {
                    format!("{col} IS NOT NULL AND {col} NOT LIKE {placeholder}")
                })
                .map(|(table, sql)| PreparedCheck {
                    name: name.clone(),
                    table,
                    label,
                    sql,
                    params: vec![SqlValue::String(c.pattern.clone())],
                });
            prepared.push((name, check));
        }

        for c in &self.checks.non_negative {
            let name = format!("non_negative:{}.{}", c.table, c.column);
            let label = c
                .label
                .clone()
                .unwrap_or_else(|| format!("rows in {} with negative {}", c.table, c.column));
            let check = self
                .column_predicate(dialect, schema, &c.table, &c.column, |col| {
                    format!("{} < 0", col)
                })
                .map(|(table, sql)| PreparedCheck {
                    name: name.clone(),
                    table,
                    label,
                    sql,
                    params: Vec::new(),
                });
            prepared.push((name, check));
        }

        for c in &self.checks.foreign_keys {
            let name = format!("orphan:{}.{}->{}.{}", c.table, c.column, c.ref_table, c.ref_column);
            let label = c.label.clone().unwrap_or_else(|| {
                format!("rows in {} with orphaned {}", c.table, c.column)
            });
            let check = self.orphan_sql(dialect, schema, c).map(|(table, sql)| PreparedCheck {
                name: name.clone(),
                table,
                label,
                sql,
                params: Vec::new(),
            });
            prepared.push((name, check));
        }

        prepared
    }

    /// Resolve a table/column pair through the allow-list into the identifiers
    /// used for `dialect`.
    fn resolve(&self, dialect: SqlDialect, table: &str, column: &str) -> Result<(String, String)> {
        let table = self.allow.table(table)?.to_string();
        let column = self.allow.column(&table, column)?.to_string();
        Ok(match dialect {
            SqlDialect::Postgres => (table.to_lowercase(), column.to_lowercase()),
            SqlDialect::Mssql => (table, column),
        })
    }

    fn column_predicate<F>(
        &self,
        dialect: SqlDialect,
        schema: &str,
        table: &str,
        column: &str,
        predicate: F,
    ) -> Result<(String, String)>
    where
        F: FnOnce(&str) -> String,
    {
        let (table, column) = self.resolve(dialect, table, column)?;
        let quoted = dialect.quote_ident(&column)?;
        let sql = dialect.count_query(schema, &table, None, Some(&predicate(&quoted)))?;
        Ok((table, sql))
    }

    fn orphan_sql(
        &self,
        dialect: SqlDialect,
        schema: &str,
        check: &ForeignKeyCheck,
    ) -> Result<(String, String)> {
        let (table, column) = self.resolve(dialect, &check.table, &check.column)?;
        let (ref_table, ref_column) = self.resolve(dialect, &check.ref_table, &check.ref_column)?;
        let column = dialect.quote_ident(&column)?;
        let ref_column = dialect.quote_ident(&ref_column)?;
        let predicate = format!(
            "c.{column} IS NOT NULL AND NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.{ref_column} = c.{column})",
            parent = dialect.qualify(schema, &ref_table)?,
        );
        let sql = dialect.count_query(schema, &table, Some("c"), Some(&predicate))?;
        Ok((table, sql))
    }
}

async fn run_count(db: &dyn CountQuery, check: &PreparedCheck) -> Result<u64> {
    let count = db
        .query_count(&check.sql, &check.params)
        .await
        .map_err(|e| MigrateError::QualityCheck {
            check: check.name.clone(),
            message: e.to_string(),
        })?;
    u64::try_from(count).map_err(|_| MigrateError::QualityCheck {
        check: check.name.clone(),
        message: format!("count query returned {}", count),
    })
}
