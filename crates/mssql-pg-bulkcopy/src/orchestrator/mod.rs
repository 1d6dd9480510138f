//! Migration orchestrator - main workflow coordinator.

pub mod plan;
pub mod report;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::baseline::{BaselineCounter, BaselineCounts};
use crate::config::{Config, QualityConfig};
use crate::core::identifier::AllowList;
use crate::core::schema::TableSchema;
use crate::core::traits::{SourceReader, TargetWriter};
use crate::drivers::{MssqlReader, PgWriter};
use crate::error::{MigrateError, Result, Side};
use crate::inspector::SchemaInspector;
use crate::materialize::{build_ddl, SchemaMaterializer};
use crate::quality::{default_checks, QualityChecker, QualityReport};
use crate::transfer::TableMigrator;
use crate::typemap::TypeMapper;

pub use plan::{default_tables, merge_foreign_keys, MigrationPlan};
pub use report::{MigrationReport, RunStatus, SkipReason, Stage, TableOutcome, TableReport};

/// Per-table inspection results, tagged so the orchestrator can skip failures.
pub type Inspected = Vec<(String, Result<TableSchema>)>;

/// Source vs target row count for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountComparison {
    pub table: String,
    pub source_rows: i64,
    pub target_rows: Option<i64>,
    pub matches: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    mapper: TypeMapper,
    checks: QualityConfig,
    dry_run: bool,
}

impl Orchestrator {
    /// Connect to both databases described by `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MssqlReader::new(&config.source).await?;
        let target = PgWriter::new(&config.target).await?;
        Ok(Self::with_drivers(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over already-constructed drivers.
    pub fn with_drivers(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        let mapper = TypeMapper::with_overrides(&config.migration.type_overrides);
        let checks = config.quality.clone().unwrap_or_else(default_checks);
        Self {
            config,
            source,
            target,
            mapper,
            checks,
            dry_run: false,
        }
    }

    /// Stop after planning and pre-migration checks.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn type_mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    /// Confirm both databases answer. Fails with a connection error naming the side.
    pub async fn health_check(&self) -> Result<()> {
        self.source
            .ping()
            .await
            .map_err(|e| connection_error(Side::Source, e))?;
        info!("Source connection OK ({})", self.source.db_type());
        self.target
            .ping()
            .await
            .map_err(|e| connection_error(Side::Target, e))?;
        info!("Target connection OK ({})", self.target.db_type());
        Ok(())
    }

    /// Build the table order, merging source foreign keys when configured.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        let mut tables = self.config.migration.tables.clone();

        if self.config.migration.discover_dependencies {
            let mut foreign_keys = Vec::new();
            for spec in &tables {
                match self.source.get_foreign_keys(&spec.name).await {
                    Ok(mut fks) => foreign_keys.append(&mut fks),
                    Err(e) => warn!("{}: foreign key discovery failed: {}", spec.name, e),
                }
            }
            debug!("Discovered {} foreign keys", foreign_keys.len());
            tables = merge_foreign_keys(&tables, &foreign_keys);
        }

        MigrationPlan::build(&tables, self.config.migration.auto_order)
    }

    /// Inspect every planned table.
    ///
    /// Per-table failures are kept in the result; a lost connection is returned.
    pub async fn inspect(&self, plan: &MigrationPlan) -> Result<Inspected> {
        let inspected = SchemaInspector::new(self.source.as_ref())
            .inspect_all(&plan.names())
            .await;

        let mut tables = Vec::with_capacity(inspected.len());
        for (table, result) in inspected {
            match result {
                Err(e) if e.is_fatal() => return Err(e),
                result => tables.push((table, result)),
            }
        }
        Ok(tables)
    }

    /// Run the quality battery against the source only.
    pub async fn check(&self) -> Result<QualityReport> {
        self.source
            .ping()
            .await
            .map_err(|e| connection_error(Side::Source, e))?;
        let plan = self.plan().await?;
        let inspected = self.inspect(&plan).await?;
        Ok(self.pre_checks(&allow_list(&inspected)).await)
    }

    /// Compare current source and target row counts for every planned table.
    pub async fn validate(&self) -> Result<Vec<CountComparison>> {
        self.health_check().await?;
        let plan = self.plan().await?;
        let source_schema = &self.config.source.schema;
        let target_schema = &self.config.target.schema;
        let dialect = self.source.dialect();

        let mut results = Vec::with_capacity(plan.len());
        for table in plan.names() {
            let sql = dialect.count_query(source_schema, &table, None, None)?;
            let source_rows = self.source.query_count(&sql, &[]).await?;
            let target_rows = match self
                .target
                .get_row_count(target_schema, &table.to_lowercase())
                .await
            {
                Ok(n) => Some(n),
                Err(e) => {
                    debug!("{}: target count failed: {}", table, e);
                    None
                }
            };

            let matches = target_rows == Some(source_rows);
            if matches {
                info!("{}: {} rows (match)", table, source_rows);
            } else {
                warn!(
                    "{}: source={} target={:?} (MISMATCH)",
                    table, source_rows, target_rows
                );
            }
            results.push(CountComparison {
                table,
                source_rows,
                target_rows,
                matches,
            });
        }

        Ok(results)
    }

    /// Run the full pipeline.
    pub async fn execute(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        info!("Phase 1: Checking connections");
        self.health_check().await?;

        info!("Phase 2: Planning table order");
        let plan = self.plan().await?;
        info!("Migration order: {}", plan.names().join(" -> "));

        info!("Phase 3: Capturing baseline row counts");
        let baseline = BaselineCounter::new(self.source.as_ref(), &self.config.source.schema)
            .capture(&plan.names())
            .await?;

        info!("Phase 4: Inspecting source schema");
        let inspected = self.inspect(&plan).await?;
        let allow = allow_list(&inspected);

        info!("Phase 5: Pre-migration quality checks");
        let pre_checks = self.pre_checks(&allow).await;

        let (status, tables, post_checks) = if self.dry_run {
            self.preview(&inspected);
            (RunStatus::DryRun, Vec::new(), None)
        } else {
            info!("Phase 6: Migrating tables");
            let (tables, cancelled) = self.run(&plan, inspected, &baseline, &cancel).await?;

            let post_checks = if self.config.migration.post_checks && !cancelled {
                info!("Phase 7: Post-migration quality checks");
                Some(
                    QualityChecker::new(&self.checks, &allow)
                        .run_checks(self.target.as_ref(), &self.config.target.schema)
                        .await,
                )
            } else {
                None
            };

            (
                MigrationReport::derive_status(&tables, cancelled),
                tables,
                post_checks,
            )
        };

        let completed_at = Utc::now();
        let report = MigrationReport {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            plan: plan.names(),
            baseline,
            pre_checks,
            post_checks,
            tables,
        };
        report.log_summary();
        Ok(report)
    }

    /// Migrate tables in plan order.
    ///
    /// Failures are recorded per table; dependents of a table that did not
    /// complete are skipped without being attempted. Returns one report per
    /// planned table in declared order, and whether the run was cancelled.
    /// A lost connection stops the run and is returned as the error.
    pub async fn run(
        &self,
        plan: &MigrationPlan,
        inspected: Inspected,
        baseline: &BaselineCounts,
        cancel: &CancellationToken,
    ) -> Result<(Vec<TableReport>, bool)> {
        let strict = self.config.migration.strict_verification;
        let mut schemas: HashMap<String, Result<TableSchema>> = inspected
            .into_iter()
            .map(|(name, result)| (name.to_lowercase(), result))
            .collect();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut reports: HashMap<String, TableReport> = HashMap::with_capacity(plan.len());
        let mut cancelled = false;

        for spec in plan.tables() {
            let key = spec.name.to_lowercase();
            cancelled = cancelled || cancel.is_cancelled();

            let report = if cancelled {
                TableReport::new(&spec.name, TableOutcome::Cancelled)
            } else if let Some(parent) = spec
                .depends_on
                .iter()
                .find(|d| blocked.contains(&d.to_lowercase()))
            {
                let skipped = MigrateError::SkippedDependency {
                    table: spec.name.clone(),
                    dependency: parent.clone(),
                };
                warn!("{}", skipped);
                TableReport::new(
                    &spec.name,
                    TableOutcome::Skipped {
                        reason: SkipReason::Dependency {
                            parent: parent.clone(),
                        },
                    },
                )
            } else {
                match schemas.remove(&key) {
                    Some(Ok(schema)) => self.migrate_table(&schema, baseline, cancel).await?,
                    Some(Err(e)) => TableReport::new(
                        &spec.name,
                        TableOutcome::Skipped {
                            reason: SkipReason::SchemaLookup {
                                error: e.to_string(),
                            },
                        },
                    ),
                    None => TableReport::new(
                        &spec.name,
                        TableOutcome::Skipped {
                            reason: SkipReason::SchemaLookup {
                                error: "table was not inspected".into(),
                            },
                        },
                    ),
                }
            };

            if matches!(report.outcome, TableOutcome::Cancelled) {
                cancelled = true;
            }
            if !report.outcome.completed(strict) {
                blocked.insert(key.clone());
            }
            reports.insert(key, report);
        }

        let ordered = plan
            .declared_names()
            .iter()
            .filter_map(|name| reports.remove(&name.to_lowercase()))
            .collect();
        Ok((ordered, cancelled))
    }

    async fn migrate_table(
        &self,
        schema: &TableSchema,
        baseline: &BaselineCounts,
        cancel: &CancellationToken,
    ) -> Result<TableReport> {
        info!("Migrating {}", schema.name);
        let materializer = SchemaMaterializer::new(
            self.target.as_ref(),
            &self.mapper,
            &self.config.target.schema,
            self.config.migration.primary_key,
        );
        let ddl = match materializer.materialize(schema).await {
            Ok(ddl) => ddl,
            Err(e) if e.is_fatal() => {
                error!("{}: {}", schema.name, e);
                return Err(e);
            }
            Err(e) => {
                error!("{}", e);
                return Ok(TableReport::new(
                    &schema.name,
                    TableOutcome::Failed {
                        stage: Stage::Materialize,
                        error: e.to_string(),
                    },
                ));
            }
        };

        let migrator = TableMigrator::new(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.config.source.schema,
            &self.config.target.schema,
        )
        .with_page_size(self.config.migration.page_size)
        .with_column_types(ddl.column_types.clone());

        let outcome = match migrator
            .migrate(schema, baseline, ddl.serial_column.as_deref(), cancel)
            .await
        {
            Ok(result) => TableOutcome::Migrated(result),
            Err(MigrateError::Cancelled) => TableOutcome::Cancelled,
            Err(e) if e.is_fatal() => {
                error!("{}: {}", schema.name, e);
                return Err(e);
            }
            Err(e) => {
                error!("{}", e);
                TableOutcome::Failed {
                    stage: Stage::Migrate,
                    error: e.to_string(),
                }
            }
        };
        Ok(TableReport::new(&schema.name, outcome).with_key(ddl.key))
    }

    async fn pre_checks(&self, allow: &AllowList) -> QualityReport {
        QualityChecker::new(&self.checks, allow)
            .run_checks(self.source.as_ref(), &self.config.source.schema)
            .await
    }

    fn preview(&self, inspected: &Inspected) {
        for (table, result) in inspected {
            let Ok(schema) = result else { continue };
            match build_ddl(
                &self.config.target.schema,
                schema,
                &self.mapper,
                self.config.migration.primary_key,
            ) {
                Ok(ddl) => info!("[dry run] {}", ddl.create),
                Err(e) => warn!("[dry run] {}: {}", table, e),
            }
        }
    }
}

fn connection_error(side: Side, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Connection { .. } => err,
        other => MigrateError::connection(side, other),
    }
}

fn allow_list(inspected: &Inspected) -> AllowList {
    AllowList::from_schemas(inspected.iter().filter_map(|(_, r)| r.as_ref().ok()))
}
