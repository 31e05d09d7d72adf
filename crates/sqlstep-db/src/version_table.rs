use chrono::{DateTime, Utc};
use rusqlite::{Connection, Statement, Transaction, params};
use serde::Serialize;
use sqlstep_common::{Error, Result};
use tracing::debug;

use crate::migrations::NIL_VERSION;

/// Table used to record applied versions when none is configured.
pub const DEFAULT_VERSION_TABLE: &str = "schema_version";

/// One row of the version table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedVersion {
    pub version: i64,
    /// `None` when the row carries no applied time.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Quote `name` as an SQL identifier. Embedded double quotes are doubled.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create the version table if it does not exist yet.
pub(crate) fn ensure_table(conn: &Connection, table: &str) -> Result<()> {
    // `applied` holds unix seconds so the layout stays portable across engines.
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            version BIGINT NOT NULL PRIMARY KEY,
            applied INTEGER
        )",
        quote_identifier(table)
    );
    conn.execute_batch(&sql).map_err(|e| {
        Error::SchemaSetup(format!("failed to create version table {table}: {e}"))
    })
}

/// Prepared statements against the version table, valid for the lifetime of
/// the borrowed connection.
pub(crate) struct VersionStatements<'c> {
    get_version: Statement<'c>,
    insert_version: Statement<'c>,
}

impl<'c> VersionStatements<'c> {
    pub(crate) fn prepare(conn: &'c Connection, table: &str) -> Result<Self> {
        let quoted = quote_identifier(table);

        let get_version = conn
            .prepare(&format!(
                "SELECT COALESCE(MAX(version), {NIL_VERSION}) FROM {quoted}"
            ))
            .map_err(|e| {
                Error::SchemaSetup(format!("failed to prepare version query on {table}: {e}"))
            })?;

        let insert_version = conn
            .prepare(&format!(
                "INSERT INTO {quoted} (version, applied) VALUES (?1, ?2)"
            ))
            .map_err(|e| {
                Error::SchemaSetup(format!("failed to prepare version insert on {table}: {e}"))
            })?;

        Ok(Self {
            get_version,
            insert_version,
        })
    }

    /// Highest recorded version, or [`NIL_VERSION`] for an empty table.
    pub(crate) fn current(&mut self) -> Result<i64> {
        self.get_version
            .query_row([], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to read current version: {e}")))
    }

    /// Record `version` as applied now. The insert joins whatever transaction
    /// is open on the connection, so `tx` only witnesses that one is.
    pub(crate) fn record(&mut self, _tx: &Transaction<'_>, version: i64) -> Result<()> {
        let applied = Utc::now().timestamp();
        debug!("recording version {version} applied at {applied}");
        self.insert_version
            .execute(params![version, applied])
            .map_err(|e| Error::Database(format!("failed to record version {version}: {e}")))?;
        Ok(())
    }
}

/// Read every recorded version, oldest first.
pub(crate) fn history(conn: &Connection, table: &str) -> Result<Vec<AppliedVersion>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT version, applied FROM {} ORDER BY version ASC",
            quote_identifier(table)
        ))
        .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)))
        .map_err(|e| Error::Database(format!("failed to query history: {e}")))?;

    let mut applied = Vec::new();
    for row in rows {
        let (version, secs) =
            row.map_err(|e| Error::Database(format!("failed to read history row: {e}")))?;
        let applied_at = secs
            .map(|secs| {
                DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                    Error::Database(format!(
                        "version {version} has out-of-range applied time {secs}"
                    ))
                })
            })
            .transpose()?;
        applied.push(AppliedVersion {
            version,
            applied_at,
        });
    }
    Ok(applied)
}
