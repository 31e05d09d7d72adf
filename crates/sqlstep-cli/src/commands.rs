use anyhow::{Context, Result};
use chrono::SecondsFormat;
use rusqlite::Connection;
use serde::Serialize;
use sqlstep_db::{Migrator, MigratorOptions, NIL_VERSION};
use tracing::{error, info};

use crate::settings::Settings;

/// Snapshot printed by `sqlstep status`.
#[derive(Debug, Serialize, PartialEq)]
pub struct StatusReport {
    pub database: String,
    pub version_table: String,
    pub current: i64,
    pub latest: i64,
    pub pending: Vec<i64>,
}

impl StatusReport {
    pub fn up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

fn open(settings: &Settings) -> Result<Connection> {
    Connection::open(&settings.database)
        .with_context(|| format!("failed to open database {}", settings.database.display()))
}

fn migrator<'c>(
    conn: &'c Connection,
    settings: &Settings,
    options: MigratorOptions,
) -> Result<Migrator<'c>> {
    let options = options.version_table(settings.version_table.clone());
    Migrator::from_dir(conn, &settings.migrations, options)
        .with_context(|| format!("failed to load migrations from {}", settings.migrations))
}

pub fn version(settings: &Settings) -> Result<()> {
    let conn = open(settings)?;
    let mut migrator = migrator(&conn, settings, MigratorOptions::new())?;
    println!("{}", migrator.version()?);
    Ok(())
}

/// Migrate to `target`, or to the latest loaded version when `None`.
pub fn up(settings: &Settings, target: Option<i64>) -> Result<()> {
    let conn = open(settings)?;
    let options = MigratorOptions::new().callback(|max, current, err| match err {
        Some(e) => error!(max, current, "migration step failed: {e}"),
        None => info!(max, current, "database at version {current} of {max}"),
    });
    let mut migrator = migrator(&conn, settings, options)?;

    match target {
        Some(version) => migrator.migrate_to(version)?,
        None => migrator.migrate()?,
    }

    println!("database at version {}", migrator.version()?);
    Ok(())
}

pub fn status(settings: &Settings, json: bool) -> Result<()> {
    let conn = open(settings)?;
    let mut migrator = migrator(&conn, settings, MigratorOptions::new())?;
    let report = build_status(settings, &mut migrator)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("database:      {}", report.database);
    println!("version table: {}", report.version_table);
    println!("current:       {}", display_version(report.current));
    println!("latest:        {}", display_version(report.latest));
    if report.up_to_date() {
        println!("pending:       none");
    } else {
        let pending: Vec<String> = report.pending.iter().map(i64::to_string).collect();
        println!("pending:       {}", pending.join(", "));
    }
    Ok(())
}

pub fn history(settings: &Settings) -> Result<()> {
    let conn = open(settings)?;
    let mut migrator = migrator(&conn, settings, MigratorOptions::new())?;

    let applied = migrator.history()?;
    if applied.is_empty() {
        println!("no migrations applied");
    }
    for row in applied {
        let applied = row
            .applied_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "unknown".to_string());
        println!("{:>8}  {applied}", row.version);
    }
    Ok(())
}

fn build_status(settings: &Settings, migrator: &mut Migrator<'_>) -> Result<StatusReport> {
    Ok(StatusReport {
        database: settings.database.display().to_string(),
        version_table: migrator.version_table().to_string(),
        current: migrator.version()?,
        latest: migrator.max_version().unwrap_or(NIL_VERSION),
        pending: migrator.pending()?,
    })
}

fn display_version(version: i64) -> String {
    if version == NIL_VERSION {
        "none".to_string()
    } else {
        version.to_string()
    }
}
