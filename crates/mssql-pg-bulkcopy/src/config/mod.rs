//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::orchestrator::default_tables;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables, loading a `.env` file first.
    ///
    /// With `env_file` the named file must exist; otherwise a `.env` in the
    /// working directory is used when present.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenv::from_path(path).map_err(|e| {
                    MigrateError::Config(format!("cannot load {}: {}", path.display(), e))
                })?;
            }
            None => {
                if let Ok(path) = dotenv::dotenv() {
                    debug!("Loaded environment from {}", path.display());
                }
            }
        }
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup.
    ///
    /// Reads `SQL_SERVER_*` and `POSTGRES_*` connection settings; the table
    /// list is the built-in Northwind subset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| MigrateError::Config(format!("{} is not set", key)))
        };
        let port = |key: &str, default: u16| -> Result<u16> {
            match get(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| MigrateError::Config(format!("{} must be a port number, got '{}'", key, v))),
                None => Ok(default),
            }
        };
        let flag = |key: &str, default: bool| match get(key) {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            None => default,
        };

        let ssl_mode = match get("POSTGRES_SSLMODE") {
            Some(v) => serde_yaml::from_str(&v).map_err(|_| {
                MigrateError::Config(format!(
                    "POSTGRES_SSLMODE must be disable, require or verify-full, got '{}'",
                    v
                ))
            })?,
            None => SslMode::default(),
        };

        let config = Config {
            source: SourceConfig {
                host: required("SQL_SERVER_HOST")?,
                port: port("SQL_SERVER_PORT", 1433)?,
                database: required("SQL_SERVER_DB")?,
                user: required("SQL_SERVER_USER")?,
                password: get("SQL_SERVER_PASSWORD").unwrap_or_default(),
                schema: get("SQL_SERVER_SCHEMA").unwrap_or_else(|| "dbo".into()),
                encrypt: flag("SQL_SERVER_ENCRYPT", true),
                trust_server_cert: flag("SQL_SERVER_TRUST_CERT", false),
            },
            target: TargetConfig {
                host: required("POSTGRES_HOST")?,
                port: port("POSTGRES_PORT", 5432)?,
                database: required("POSTGRES_DB")?,
                user: required("POSTGRES_USER")?,
                password: get("POSTGRES_PASSWORD").unwrap_or_default(),
                schema: get("POSTGRES_SCHEMA").unwrap_or_else(|| "public".into()),
                ssl_mode,
            },
            migration: MigrationConfig {
                tables: default_tables(),
                ..Default::default()
            },
            quality: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}
