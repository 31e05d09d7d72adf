use rusqlite::Transaction;
use sqlstep_common::{Error, Result};

/// The version a database is at before any migration has been applied.
pub const NIL_VERSION: i64 = -1;

/// A single versioned schema change.
///
/// Implementations run their payload against the transaction handed to them
/// by the [`Migrator`](crate::Migrator) and must not commit or roll it back
/// themselves. Errors propagate unchanged; the migrator decides what to do.
pub trait Migration {
    /// Version of this migration. Must be stable across calls.
    fn version(&self) -> i64;

    /// Execute the migration inside `tx`.
    fn run(&self, tx: &Transaction<'_>) -> Result<()>;

    /// Label used in logs and status output.
    fn name(&self) -> String {
        format!("v{}", self.version())
    }
}

/// A migration whose payload is a literal SQL script.
#[derive(Debug, Clone)]
pub struct StringMigration {
    version: i64,
    sql: String,
}

impl StringMigration {
    pub fn new(version: i64, sql: impl Into<String>) -> Self {
        Self {
            version,
            sql: sql.into(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl Migration for StringMigration {
    fn version(&self) -> i64 {
        self.version
    }

    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        execute_script(tx, &self.sql)
    }
}

/// A migration backed by a closure, for changes that need Rust logic
/// rather than plain SQL.
pub struct FnMigration<F> {
    version: i64,
    name: String,
    f: F,
}

impl<F> FnMigration<F>
where
    F: Fn(&Transaction<'_>) -> Result<()>,
{
    pub fn new(version: i64, name: impl Into<String>, f: F) -> Self {
        Self {
            version,
            name: name.into(),
            f,
        }
    }
}

impl<F> Migration for FnMigration<F>
where
    F: Fn(&Transaction<'_>) -> Result<()>,
{
    fn version(&self) -> i64 {
        self.version
    }

    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        (self.f)(tx)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Run a (possibly multi-statement) script as-is.
pub(crate) fn execute_script(tx: &Transaction<'_>, sql: &str) -> Result<()> {
    tx.execute_batch(sql)
        .map_err(|e| Error::Database(e.to_string()))
}
