//! Migration order: validation of the declared order, topological sorting and
//! foreign-key discovery.

use std::collections::{HashMap, HashSet};

use crate::core::schema::{ForeignKey, TableSpec};
use crate::error::{MigrateError, Result};

/// Validated, immutable table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    order: Vec<TableSpec>,
    declared: Vec<String>,
}

/// Lowercased name → declaration index, rejecting empty names and duplicates.
fn index_tables(tables: &[TableSpec]) -> Result<HashMap<String, usize>> {
    if tables.is_empty() {
        return Err(MigrateError::Config(
            "migration.tables must list at least one table".into(),
        ));
    }

    let mut index = HashMap::with_capacity(tables.len());
    for (i, spec) in tables.iter().enumerate() {
        if spec.name.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "migration.tables[{}].name is required",
                i
            )));
        }
        if index.insert(spec.name.to_lowercase(), i).is_some() {
            return Err(MigrateError::Config(format!(
                "table {} is listed more than once",
                spec.name
            )));
        }
    }
    Ok(index)
}

/// Resolve every dependency to the canonical spelling of a planned table.
fn normalize(tables: &[TableSpec], index: &HashMap<String, usize>) -> Result<Vec<TableSpec>> {
    tables
        .iter()
        .map(|spec| {
            let mut deps: Vec<String> = Vec::with_capacity(spec.depends_on.len());
            for dep in &spec.depends_on {
                let Some(&idx) = index.get(&dep.to_lowercase()) else {
                    return Err(MigrateError::Config(format!(
                        "table {} depends on {}, which is not in migration.tables",
                        spec.name, dep
                    )));
                };
                let canonical = &tables[idx].name;
                if canonical.eq_ignore_ascii_case(&spec.name) {
                    return Err(MigrateError::Config(format!(
                        "table {} depends on itself",
                        spec.name
                    )));
                }
                if !deps.contains(canonical) {
                    deps.push(canonical.clone());
                }
            }
            Ok(TableSpec {
                name: spec.name.clone(),
                depends_on: deps,
            })
        })
        .collect()
}

impl MigrationPlan {
    /// Build a plan from configuration, either trusting the declared order
    /// (after validating it) or computing one.
    pub fn build(tables: &[TableSpec], auto_order: bool) -> Result<Self> {
        if auto_order {
            Self::auto_ordered(tables)
        } else {
            Self::from_declared(tables)
        }
    }

    /// Accept the declared order if every table appears after its dependencies.
    pub fn from_declared(tables: &[TableSpec]) -> Result<Self> {
        let index = index_tables(tables)?;
        let order = normalize(tables, &index)?;

        for (pos, spec) in order.iter().enumerate() {
            for dep in &spec.depends_on {
                let dep_pos = index[&dep.to_lowercase()];
                if dep_pos > pos {
                    return Err(MigrateError::Config(format!(
                        "table {} depends on {}, which is listed after it \
                         (reorder migration.tables or set migration.auto_order: true)",
                        spec.name, dep
                    )));
                }
            }
        }

        Ok(Self {
            declared: order.iter().map(|t| t.name.clone()).collect(),
            order,
        })
    }

    /// Topologically sort the tables. Ties keep declaration order.
    pub fn auto_ordered(tables: &[TableSpec]) -> Result<Self> {
        let index = index_tables(tables)?;
        let specs = normalize(tables, &index)?;

        let mut remaining: Vec<usize> = specs.iter().map(|s| s.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                dependents[index[&dep.to_lowercase()]].push(i);
            }
        }

        let mut placed = vec![false; specs.len()];
        let mut order = Vec::with_capacity(specs.len());
        // Repeatedly take the earliest-declared table with no unplaced dependencies.
        while let Some(next) = (0..specs.len()).find(|&i| !placed[i] && remaining[i] == 0) {
            placed[next] = true;
            for &d in &dependents[next] {
                remaining[d] -= 1;
            }
            order.push(specs[next].clone());
        }

        if order.len() < specs.len() {
            let cycle: Vec<&str> = specs
                .iter()
                .zip(&placed)
                .filter(|(_, &p)| !p)
                .map(|(s, _)| s.name.as_str())
                .collect();
            return Err(MigrateError::Config(format!(
                "dependency cycle between tables: {}",
                cycle.join(", ")
            )));
        }

        Ok(Self {
            declared: specs.iter().map(|t| t.name.clone()).collect(),
            order,
        })
    }

    /// Tables in migration order.
    pub fn tables(&self) -> &[TableSpec] {
        &self.order
    }

    /// Table names in migration order.
    pub fn names(&self) -> Vec<String> {
        self.order.iter().map(|t| t.name.clone()).collect()
    }

    /// Table names in the order they were declared.
    pub fn declared_names(&self) -> &[String] {
        &self.declared
    }

    pub fn dependencies(&self, table: &str) -> &[String] {
        self.order
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .map(|t| t.depends_on.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Add foreign keys between planned tables to the declared dependencies.
///
/// Relationships to tables outside the plan, and self-references, are ignored.
pub fn merge_foreign_keys(tables: &[TableSpec], foreign_keys: &[ForeignKey]) -> Vec<TableSpec> {
    let planned: HashSet<String> = tables.iter().map(|t| t.name.to_lowercase()).collect();

    tables
        .iter()
        .map(|spec| {
            let mut merged = spec.clone();
            for fk in foreign_keys
                .iter()
                .filter(|fk| fk.table.eq_ignore_ascii_case(&spec.name))
            {
                let parent = fk.ref_table.to_lowercase();
                if parent == spec.name.to_lowercase() || !planned.contains(&parent) {
                    continue;
                }
                if !merged
                    .depends_on
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(&fk.ref_table))
                {
                    merged.depends_on.push(fk.ref_table.clone());
                }
            }
            merged
        })
        .collect()
}

/// The four-table Northwind subset migrated when no table list is configured.
pub fn default_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("Categories"),
        TableSpec::new("Suppliers"),
        TableSpec::new("Customers"),
        TableSpec::new("Products").depends_on(["Categories", "Suppliers"]),
    ]
}
