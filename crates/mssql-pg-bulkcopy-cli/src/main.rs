//! mssql-pg-bulkcopy CLI - dependency-ordered MSSQL to PostgreSQL bulk copy.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mssql_pg_bulkcopy::{
    Config, MigrateError, MigrationPlan, Orchestrator, RunStatus, TableOutcome, TypeMapper,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when the run finished but some tables failed, were skipped or
/// did not verify.
const EXIT_COMPLETED_WITH_ERRORS: u8 = 5;

#[derive(Parser)]
#[command(name = "mssql-pg-bulkcopy")]
#[command(about = "Dependency-ordered MSSQL to PostgreSQL bulk copy with data-quality checks")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: read SQL_SERVER_* / POSTGRES_* variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading environment variables
    #[arg(long)]
    env: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Stop after planning and pre-migration quality checks
        #[arg(long)]
        dry_run: bool,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override rows per INSERT statement
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Run the data-quality checks against the source only
    Check,

    /// Validate row counts between source and target
    Validate,

    /// Print the table migration order
    Plan,

    /// Print the source to target type table
    TypeMap,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    // Type table needs no connection settings.
    if let Commands::TypeMap = cli.command {
        let mapper = match &cli.config {
            Some(path) => {
                let config = Config::load(path)?;
                TypeMapper::with_overrides(&config.migration.type_overrides)
            }
            None => TypeMapper::default(),
        };
        print_type_map(&mapper, cli.output_json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = load_config(cli.config.as_deref(), cli.env.as_deref())?;

    match cli.command {
        Commands::TypeMap => unreachable!(), // Handled above
        Commands::Run {
            dry_run,
            source_schema,
            target_schema,
            page_size,
        } => {
            if let Some(schema) = source_schema {
                config.source.schema = schema;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            if let Some(size) = page_size {
                config.migration.page_size = size;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?.dry_run(dry_run);
            let report = orchestrator.execute(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = match report.status {
                    RunStatus::DryRun => "Dry run completed!",
                    RunStatus::Completed => "Migration completed!",
                    RunStatus::CompletedWithErrors => "Migration completed with errors",
                    RunStatus::Cancelled => "Migration cancelled",
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Order: {}", report.plan.join(" -> "));
                for line in report.pre_checks.lines() {
                    println!("  Quality: {}", line.trim_start());
                }
                for table in &report.tables {
                    println!("  {}: {}", table.table, describe(&table.outcome));
                }
                println!(
                    "  Tables verified: {}/{}",
                    report.verified(),
                    report.tables.len()
                );
                println!("  Rows: {}", report.rows_transferred());
            }

            return Ok(match report.status {
                RunStatus::Completed | RunStatus::DryRun => ExitCode::SUCCESS,
                RunStatus::CompletedWithErrors => ExitCode::from(EXIT_COMPLETED_WITH_ERRORS),
                RunStatus::Cancelled => ExitCode::from(MigrateError::Cancelled.exit_code()),
            });
        }

        Commands::Check => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.check().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Data quality ({} checks):", report.checks_run);
                for line in report.lines() {
                    println!("  {}", line.trim_start());
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for r in &results {
                    let target = r
                        .target_rows
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    let status = if r.matches { "OK" } else { "MISMATCH" };
                    println!(
                        "  {:<24} source={:<10} target={:<10} {}",
                        r.table, r.source_rows, target, status
                    );
                }
            }
            if results.iter().any(|r| !r.matches) {
                return Ok(ExitCode::from(EXIT_COMPLETED_WITH_ERRORS));
            }
            println!("Validation completed successfully");
        }

        Commands::Plan => {
            let plan = if config.migration.discover_dependencies {
                Orchestrator::new(config).await?.plan().await?
            } else {
                MigrationPlan::build(&config.migration.tables, config.migration.auto_order)?
            };
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan.names())?);
            } else {
                for (i, spec) in plan.tables().iter().enumerate() {
                    if spec.depends_on.is_empty() {
                        println!("{}. {}", i + 1, spec.name);
                    } else {
                        println!(
                            "{}. {} (after {})",
                            i + 1,
                            spec.name,
                            spec.depends_on.join(", ")
                        );
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            orchestrator.health_check().await?;
            println!("Health Check Results:");
            println!("  Source (MSSQL): OK");
            println!("  Target (PostgreSQL): OK");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>, env_file: Option<&Path>) -> Result<Config, MigrateError> {
    match path {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => {
            let config = Config::from_env(env_file)?;
            info!("Loaded configuration from environment");
            Ok(config)
        }
    }
}

fn describe(outcome: &TableOutcome) -> String {
    match outcome {
        TableOutcome::Migrated(r) if r.verified => format!("{} rows, verified", r.rows_written),
        TableOutcome::Migrated(r) => format!(
            "{} rows written, target has {}",
            r.rows_written,
            r.target_rows
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        TableOutcome::Failed { stage, error } => format!("failed during {:?}: {}", stage, error),
        TableOutcome::Skipped { reason } => format!("skipped ({:?})", reason),
        TableOutcome::Cancelled => "cancelled".to_string(),
    }
}

fn print_type_map(mapper: &TypeMapper, json: bool) -> Result<(), MigrateError> {
    if json {
        let map: std::collections::BTreeMap<&str, &str> = mapper.entries().collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (source, target) in mapper.entries() {
            println!("{:<16} -> {}", source, target);
        }
        println!("{:<16} -> {}", "(other)", mssql_pg_bulkcopy::typemap::FALLBACK_TYPE);
    }
    Ok(())
}

/// Logs go to stderr so `--output-json` output stays parseable.
fn setup_logging(verbosity: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity.to_lowercase().as_str() {
            "debug" => "debug",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        })
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Rolling back the current table...", name);
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Rolling back the current table...");
            token.cancel();
        }
    });

    cancel_token
}
