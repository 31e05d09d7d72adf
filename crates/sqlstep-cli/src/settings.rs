use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sqlstep_config::{AppConfig, ConfigLoader};
use sqlstep_db::DEFAULT_VERSION_TABLE;

const DEFAULT_MIGRATIONS: &str = "migrations";

/// Effective settings after layering flags over the config file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database: PathBuf,
    pub migrations: String,
    pub version_table: String,
    pub log_level: String,
    pub json_logs: bool,
}

/// Values given on the command line (or through their env vars).
#[derive(Debug, Default)]
pub struct Overrides {
    pub database: Option<PathBuf>,
    pub migrations: Option<String>,
    pub version_table: Option<String>,
    pub json_logs: bool,
}

impl Settings {
    pub fn resolve(
        config_path: Option<&Path>,
        database: Option<PathBuf>,
        migrations: Option<String>,
        version_table: Option<String>,
        json_logs: bool,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => {
                let cwd = std::env::current_dir().context("failed to read working directory")?;
                ConfigLoader::discover(&cwd)?.unwrap_or_default()
            }
        };

        Self::merge(
            Overrides {
                database,
                migrations,
                version_table,
                json_logs,
            },
            config,
        )
    }

    pub fn merge(overrides: Overrides, config: AppConfig) -> Result<Self> {
        let Some(database) = overrides.database.or(config.database.path) else {
            bail!("no database configured: pass --database or set database.path in the config");
        };

        Ok(Self {
            database,
            migrations: overrides
                .migrations
                .or(config.migrations.source)
                .unwrap_or_else(|| DEFAULT_MIGRATIONS.to_string()),
            version_table: overrides
                .version_table
                .or(config.migrations.version_table)
                .unwrap_or_else(|| DEFAULT_VERSION_TABLE.to_string()),
            log_level: config.logging.level,
            json_logs: overrides.json_logs || config.logging.json,
        })
    }
}
