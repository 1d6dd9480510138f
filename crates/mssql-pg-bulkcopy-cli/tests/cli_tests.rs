//! CLI integration tests for mssql-pg-bulkcopy.
//!
//! These tests cover argument parsing, help output, the commands that need
//! no database connection, and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mssql-pg-bulkcopy binary with a clean environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("mssql-pg-bulkcopy").unwrap();
    cmd.env_clear();
    cmd
}

fn config_file(tables: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"source:
  host: mssql.internal
  database: Northwind
  user: sa
  password: secret
target:
  host: pg.internal
  database: northwind
  user: postgres
  password: secret
migration:
{}
"#,
        tables
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("type-map"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--source-schema"))
        .stdout(predicate::str::contains("--page-size"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql-pg-bulkcopy"));
}

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--env"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Commands Without a Database
// =============================================================================

#[test]
fn test_type_map_defaults() {
    cmd()
        .arg("type-map")
        .assert()
        .success()
        .stdout(predicate::str::contains("nvarchar"))
        .stdout(predicate::str::contains("-> VARCHAR"))
        .stdout(predicate::str::contains("money"))
        .stdout(predicate::str::contains("-> NUMERIC(19,4)"))
        .stdout(predicate::str::contains("(other)"));
}

#[test]
fn test_type_map_json_with_overrides() {
    let file = config_file(
        "  tables:\n    - name: Customers\n  type_overrides:\n    geography: BYTEA\n    bit: SMALLINT",
    );
    cmd()
        .args([
            "--output-json",
            "--config",
            file.path().to_str().unwrap(),
            "type-map",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"geography\": \"BYTEA\""))
        .stdout(predicate::str::contains("\"bit\": \"SMALLINT\""));
}

#[test]
fn test_plan_declared_order() {
    let file = config_file(
        "  tables:\n    - name: Categories\n    - name: Suppliers\n    - name: Products\n      depends_on: [Categories, Suppliers]",
    );
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. Categories"))
        .stdout(predicate::str::contains(
            "3. Products (after Categories, Suppliers)",
        ));
}

#[test]
fn test_plan_auto_order() {
    let file = config_file(
        "  auto_order: true\n  tables:\n    - name: Products\n      depends_on: [Suppliers]\n    - name: Suppliers",
    );
    cmd()
        .args([
            "--output-json",
            "--config",
            file.path().to_str().unwrap(),
            "plan",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Suppliers\",\n  \"Products\""));
}

#[test]
fn test_plan_from_env_file_uses_default_tables() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("bulkcopy.env");
    std::fs::write(
        &env_path,
        "SQL_SERVER_HOST=mssql.internal\nSQL_SERVER_DB=Northwind\nSQL_SERVER_USER=sa\n\
         POSTGRES_HOST=pg.internal\nPOSTGRES_DB=northwind\nPOSTGRES_USER=postgres\n",
    )
    .unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["--env", env_path.to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4. Products (after Categories, Suppliers)"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_missing_config_file_exits_with_code_1() {
    // A missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_empty_table_list_exits_with_code_2() {
    let file = config_file("  page_size: 100");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("migration.tables"));
}

#[test]
fn test_dependency_cycle_exits_with_code_2() {
    let file = config_file(
        "  auto_order: true\n  tables:\n    - name: A\n      depends_on: [B]\n    - name: B\n      depends_on: [A]",
    );
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn test_missing_environment_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .current_dir(dir.path())
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SQL_SERVER_HOST is not set"));
}

#[test]
fn test_run_rejects_zero_page_size() {
    let file = config_file("  tables:\n    - name: Customers");
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--page-size",
            "0",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("page_size"));
}
