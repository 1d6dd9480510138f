//! Configuration validation.

use super::{Config, QualityConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }

    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    validate_identifier(&config.source.schema)?;
    validate_identifier(&config.target.schema)?;

    // Migration config validation
    let migration = &config.migration;
    if migration.page_size == 0 {
        return Err(MigrateError::Config(
            "migration.page_size must be at least 1".into(),
        ));
    }
    if migration.tables.is_empty() {
        return Err(MigrateError::Config(
            "migration.tables must list at least one table".into(),
        ));
    }
    for spec in &migration.tables {
        validate_identifier(&spec.name)?;
        for dep in &spec.depends_on {
            validate_identifier(dep)?;
        }
    }
    for (source_type, target_type) in &migration.type_overrides {
        if source_type.trim().is_empty() || target_type.trim().is_empty() {
            return Err(MigrateError::Config(
                "migration.type_overrides entries must name both types".into(),
            ));
        }
    }

    if let Some(quality) = &config.quality {
        validate_quality(quality)?;
    }

    Ok(())
}

fn validate_quality(quality: &QualityConfig) -> Result<()> {
    let columns = quality
        .required
        .iter()
        .chain(&quality.non_negative)
        .map(|c| (&c.table, &c.column))
        .chain(quality.patterns.iter().map(|c| (&c.table, &c.column)))
        .chain(quality.foreign_keys.iter().map(|c| (&c.table, &c.column)))
        .chain(
            quality
                .foreign_keys
                .iter()
                .map(|c| (&c.ref_table, &c.ref_column)),
        );
    for (table, column) in columns {
        validate_identifier(table)?;
        validate_identifier(column)?;
    }

    if let Some(check) = quality.patterns.iter().find(|p| p.pattern.is_empty()) {
        return Err(MigrateError::Config(format!(
            "quality pattern for {}.{} is empty",
            check.table, check.column
        )));
    }
    Ok(())
}
