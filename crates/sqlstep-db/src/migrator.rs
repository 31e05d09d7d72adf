use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;
use sqlstep_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::migrations::{Migration, NIL_VERSION};
use crate::source::{MigrationTree, dir_migrations, string_migrations, tree_migrations};
use crate::version_table::{
    self, AppliedVersion, DEFAULT_VERSION_TABLE, VersionStatements, ensure_table,
};

/// Progress callback: `(max_version, current_version, error)`.
///
/// Called on the migrating thread after every step, successful or not, and
/// once when the database is already at or past the requested target.
pub type ResultFn = Box<dyn FnMut(i64, i64, Option<&Error>)>;

/// Construction options for a [`Migrator`].
#[derive(Default)]
pub struct MigratorOptions {
    version_table: Option<String>,
    callback: Option<ResultFn>,
    cancel: Option<Arc<AtomicBool>>,
}

impl MigratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record applied versions in `name` instead of `schema_version`.
    pub fn version_table(mut self, name: impl Into<String>) -> Self {
        self.version_table = Some(name.into());
        self
    }

    pub fn callback(mut self, f: impl FnMut(i64, i64, Option<&Error>) + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    /// Checked before each step; once set, no further migration is started.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
}

impl std::fmt::Debug for MigratorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratorOptions")
            .field("version_table", &self.version_table)
            .field("callback", &self.callback.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Applies versioned migrations to a borrowed SQLite connection.
///
/// Preparation (version table, statements, sorting) happens lazily on the
/// first call and is kept for the lifetime of the migrator. If it fails the
/// migrator stays unprepared and the next call tries again.
pub struct Migrator<'c> {
    conn: &'c Connection,
    migrations: Vec<Box<dyn Migration>>,
    version_table: String,
    callback: Option<ResultFn>,
    cancel: Option<Arc<AtomicBool>>,
    statements: Option<VersionStatements<'c>>,
}

impl<'c> Migrator<'c> {
    pub fn new(
        conn: &'c Connection,
        migrations: Vec<Box<dyn Migration>>,
        options: MigratorOptions,
    ) -> Result<Self> {
        let version_table = options
            .version_table
            .unwrap_or_else(|| DEFAULT_VERSION_TABLE.to_string());
        if version_table.trim().is_empty() {
            return Err(Error::Config("version table name cannot be empty".into()));
        }

        Ok(Self {
            conn,
            migrations,
            version_table,
            callback: options.callback,
            cancel: options.cancel,
            statements: None,
        })
    }

    /// Load migrations from a directory path or `file://` URI.
    pub fn from_dir(conn: &'c Connection, uri: &str, options: MigratorOptions) -> Result<Self> {
        Self::new(conn, dir_migrations(uri)?, options)
    }

    /// Load migrations from an embedded tree.
    pub fn from_tree(
        conn: &'c Connection,
        tree: Arc<dyn MigrationTree>,
        options: MigratorOptions,
    ) -> Result<Self> {
        Self::new(conn, tree_migrations(tree)?, options)
    }

    /// Use `scripts` as migrations 1..=N.
    pub fn from_strings<S: AsRef<str>>(
        conn: &'c Connection,
        scripts: &[S],
        options: MigratorOptions,
    ) -> Result<Self> {
        Self::new(conn, string_migrations(scripts)?, options)
    }

    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Highest loaded migration version.
    pub fn max_version(&self) -> Option<i64> {
        self.migrations.iter().map(|m| m.version()).max()
    }

    /// Loaded migrations, ascending once the migrator has been prepared.
    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Current database version, or [`NIL_VERSION`] if nothing is applied.
    pub fn version(&mut self) -> Result<i64> {
        self.prepare()?.current()
    }

    /// Apply every pending migration.
    pub fn migrate(&mut self) -> Result<()> {
        self.prepare()?;
        let target = self.max_version().unwrap_or(NIL_VERSION);
        self.migrate_to(target)
    }

    /// Apply pending migrations up to and including `target`.
    ///
    /// Each migration runs in its own transaction together with the insert
    /// of its version row. The first failure rolls that step back and ends
    /// the call; earlier steps stay committed.
    pub fn migrate_to(&mut self, target: i64) -> Result<()> {
        self.prepare()?;
        let max_version = self.max_version().unwrap_or(NIL_VERSION);

        let Self {
            conn,
            migrations,
            callback,
            cancel,
            statements,
            ..
        } = self;
        let Some(statements) = statements.as_mut() else {
            return Err(Error::Other("migrator is not prepared".into()));
        };

        let mut current = statements.current()?;
        if current >= target {
            debug!("database at version {current}, nothing to do for target {target}");
            notify(callback, max_version, current, None);
            return Ok(());
        }

        // Every remaining version must follow its predecessor, including
        // those past the target that this call will not apply.
        let mut expected = current;
        for migration in migrations.iter() {
            let next = migration.version();
            if next <= current {
                continue;
            }

            if expected != NIL_VERSION && next != expected + 1 {
                let err = Error::Sequence {
                    current: expected,
                    next,
                };
                notify(callback, max_version, current, Some(&err));
                return Err(err);
            }
            expected = next;

            if next > target {
                continue;
            }

            if let Some(flag) = cancel {
                if flag.load(Ordering::SeqCst) {
                    warn!("migration cancelled before version {next}");
                    let err = Error::Cancelled { version: next };
                    notify(callback, max_version, current, Some(&err));
                    return Err(err);
                }
            }

            info!("running migration {next} ({})", migration.name());
            if let Err(e) = apply(*conn, statements, &**migration) {
                let err = Error::Apply {
                    version: next,
                    source: Box::new(e),
                };
                warn!("{err}");
                notify(callback, max_version, current, Some(&err));
                return Err(err);
            }

            current = next;
            notify(callback, max_version, current, None);
        }

        info!("database at version {current}");
        Ok(())
    }

    /// Versions a full [`migrate`](Self::migrate) would try to apply.
    pub fn pending(&mut self) -> Result<Vec<i64>> {
        let current = self.version()?;
        Ok(self
            .migrations
            .iter()
            .map(|m| m.version())
            .filter(|v| *v > current)
            .collect())
    }

    /// Every recorded version, oldest first.
    pub fn history(&mut self) -> Result<Vec<AppliedVersion>> {
        self.prepare()?;
        version_table::history(self.conn, &self.version_table)
    }

    fn prepare(&mut self) -> Result<&mut VersionStatements<'c>> {
        if self.statements.is_none() {
            ensure_table(self.conn, &self.version_table)?;
            check_migration_set(&self.migrations)?;
            let statements = VersionStatements::prepare(self.conn, &self.version_table)?;
            self.migrations.sort_by_key(|m| m.version());
            debug!(
                "prepared {} migrations against {}",
                self.migrations.len(),
                self.version_table
            );
            self.statements = Some(statements);
        }

        self.statements
            .as_mut()
            .ok_or_else(|| Error::Other("migrator is not prepared".into()))
    }
}

fn check_migration_set(migrations: &[Box<dyn Migration>]) -> Result<()> {
    if migrations.is_empty() {
        return Err(Error::Config("no migrations loaded".into()));
    }

    let mut seen = HashSet::new();
    for migration in migrations {
        let version = migration.version();
        if version < 0 {
            return Err(Error::Config(format!(
                "invalid migration version {version} for {}",
                migration.name()
            )));
        }
        if !seen.insert(version) {
            return Err(Error::Config(format!(
                "duplicate migration version {version}"
            )));
        }
    }
    Ok(())
}

/// Run one migration and record its version in a single transaction.
/// Dropping the transaction on any error rolls it back.
fn apply(
    conn: &Connection,
    statements: &mut VersionStatements<'_>,
    migration: &dyn Migration,
) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

    migration.run(&tx)?;
    statements.record(&tx, migration.version())?;

    debug!("committing version {}", migration.version());
    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit: {e}")))
}

fn notify(callback: &mut Option<ResultFn>, max: i64, current: i64, err: Option<&Error>) {
    if let Some(cb) = callback.as_mut() {
        cb(max, current, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{FnMigration, StringMigration};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sql(version: i64, sql: &str) -> Box<dyn Migration> {
        Box::new(StringMigration::new(version, sql))
    }

    fn count_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("select count(*) from {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    type Calls = Rc<RefCell<Vec<(i64, i64, Option<String>)>>>;

    fn recording_options() -> (MigratorOptions, Calls) {
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let options = MigratorOptions::new().callback(move |max, current, err| {
            sink.borrow_mut()
                .push((max, current, err.map(|e| e.to_string())));
        });
        (options, calls)
    }

    #[test]
    fn fresh_database_reports_nil_version() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrator =
            Migrator::new(&conn, vec![sql(1, "select 1")], MigratorOptions::new()).unwrap();
        assert_eq!(migrator.version().unwrap(), NIL_VERSION);
    }

    #[test]
    fn migrate_applies_everything_in_version_order() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = vec![
            sql(3, "insert into log values (3)"),
            sql(4, "insert into log values (4)"),
            sql(2, "insert into log values (2)"),
            sql(1, "create table log (n int)"),
        ];
        let mut migrator = Migrator::new(&conn, migrations, MigratorOptions::new()).unwrap();
        migrator.migrate().unwrap();
        assert_eq!(migrator.version().unwrap(), 4);

        let order: Vec<i64> = {
            let mut stmt = conn.prepare("select n from log order by rowid").unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn migrate_to_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let (options, calls) = recording_options();
        let mut migrator = Migrator::from_strings(
            &conn,
            &[
                "create table t (pk int primary key)",
                "insert into t values (1)",
                "insert into t values (2)",
            ],
            options,
        )
        .unwrap();

        migrator.migrate_to(2).unwrap();
        migrator.migrate_to(2).unwrap();
        assert_eq!(migrator.version().unwrap(), 2);
        assert_eq!(count_rows(&conn, "t"), 1);

        let calls = calls.borrow();
        assert_eq!(
            *calls,
            vec![(3, 1, None), (3, 2, None), (3, 2, None)]
        );
    }

    #[test]
    fn failure_stops_at_last_committed_version() {
        let conn = Connection::open_in_memory().unwrap();
        let attempted = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&attempted);
        let (options, calls) = recording_options();

        let migrations: Vec<Box<dyn Migration>> = vec![
            sql(1, "create table t (pk int primary key)"),
            sql(2, "insert into t values (1)"),
            sql(3, "insert into t values (2); insert into missing_table values (1)"),
            Box::new(FnMigration::new(4, "never", move |_tx| {
                *flag.borrow_mut() = true;
                Ok(())
            })),
        ];
        let mut migrator = Migrator::new(&conn, migrations, options).unwrap();

        let err = migrator.migrate().unwrap_err();
        assert!(matches!(err, Error::Apply { version: 3, .. }), "{err}");
        assert_eq!(
            err.to_string(),
            "migration 3 failed: no such table: missing_table"
        );
        let Error::Apply { source, .. } = &err else {
            unreachable!()
        };
        assert!(matches!(**source, Error::Database(ref msg) if msg == "no such table: missing_table"));
        assert_eq!(migrator.version().unwrap(), 2);
        assert_eq!(count_rows(&conn, "t"), 1);
        assert!(!*attempted.borrow());

        let calls = calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            (
                4,
                2,
                Some("migration 3 failed: no such table: missing_table".to_string())
            )
        );
    }

    #[test]
    fn gap_against_applied_version_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        {
            let mut first = Migrator::new(
                &conn,
                vec![sql(1, "select 1"), sql(2, "select 2")],
                MigratorOptions::new(),
            )
            .unwrap();
            first.migrate().unwrap();
        }

        let mut second = Migrator::new(
            &conn,
            vec![sql(1, "select 1"), sql(2, "select 2"), sql(5, "select 5")],
            MigratorOptions::new(),
        )
        .unwrap();
        let err = second.migrate().unwrap_err();
        assert!(matches!(err, Error::Sequence { current: 2, next: 5 }));
        assert_eq!(second.version().unwrap(), 2);
    }

    #[test]
    fn first_migration_may_start_above_one() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrator = Migrator::new(
            &conn,
            vec![sql(10, "select 1"), sql(11, "select 2")],
            MigratorOptions::new(),
        )
        .unwrap();
        migrator.migrate().unwrap();
        assert_eq!(migrator.version().unwrap(), 11);
    }

    #[test]
    fn gap_past_the_target_still_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let (options, calls) = recording_options();
        let mut migrator = Migrator::new(
            &conn,
            vec![sql(1, "select 1"), sql(2, "select 2"), sql(7, "select 7")],
            options,
        )
        .unwrap();

        let err = migrator.migrate_to(5).unwrap_err();
        assert!(matches!(err, Error::Sequence { current: 2, next: 7 }), "{err}");
        assert_eq!(err.to_string(), "non-contiguous migration: 2 -> 7");
        assert_eq!(migrator.version().unwrap(), 2);

        let calls = calls.borrow();
        assert_eq!(calls[..2], [(7, 1, None), (7, 2, None)]);
        assert_eq!(
            calls[2],
            (7, 2, Some("non-contiguous migration: 2 -> 7".to_string()))
        );
    }

    #[test]
    fn gap_below_the_applied_version_is_ignored() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "create table schema_version (version bigint not null primary key, applied integer);
             insert into schema_version (version, applied) values (4, 0);",
        )
        .unwrap();
        let mut migrator = Migrator::new(
            &conn,
            vec![sql(1, "select 1"), sql(5, "select 5"), sql(6, "select 6")],
            MigratorOptions::new(),
        )
        .unwrap();
        migrator.migrate_to(5).unwrap();
        assert_eq!(migrator.version().unwrap(), 5);
    }

    #[test]
    fn empty_migration_set_is_a_configuration_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrator = Migrator::new(&conn, Vec::new(), MigratorOptions::new()).unwrap();
        assert!(matches!(migrator.migrate(), Err(Error::Config(_))));
        assert!(matches!(migrator.version(), Err(Error::Config(_))));
    }

    #[test]
    fn duplicate_and_negative_versions_are_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let mut dup = Migrator::new(
            &conn,
            vec![sql(1, "select 1"), sql(1, "select 2")],
            MigratorOptions::new(),
        )
        .unwrap();
        assert!(matches!(dup.migrate(), Err(Error::Config(_))));

        let mut negative =
            Migrator::new(&conn, vec![sql(-3, "select 1")], MigratorOptions::new()).unwrap();
        assert!(matches!(negative.migrate(), Err(Error::Config(_))));
    }

    #[test]
    fn custom_version_table_is_used() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrator = Migrator::from_strings(
            &conn,
            &["select 1"],
            MigratorOptions::new().version_table("app_versions"),
        )
        .unwrap();
        assert_eq!(migrator.version_table(), "app_versions");
        migrator.migrate().unwrap();
        assert_eq!(count_rows(&conn, "app_versions"), 1);

        let history = migrator.history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
    }

    #[test]
    fn empty_version_table_name_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let result = Migrator::from_strings(
            &conn,
            &["select 1"],
            MigratorOptions::new().version_table(" "),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn pending_lists_unapplied_versions() {
        let conn = Connection::open_in_memory().unwrap();
        let mut migrator = Migrator::from_strings(
            &conn,
            &["select 1", "select 2", "select 3"],
            MigratorOptions::new(),
        )
        .unwrap();
        assert_eq!(migrator.pending().unwrap(), vec![1, 2, 3]);
        migrator.migrate_to(1).unwrap();
        assert_eq!(migrator.pending().unwrap(), vec![2, 3]);
        migrator.migrate().unwrap();
        assert!(migrator.pending().unwrap().is_empty());
    }

    #[test]
    fn cancel_flag_stops_before_next_step() {
        let conn = Connection::open_in_memory().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let trip = Arc::clone(&cancel);

        let migrations: Vec<Box<dyn Migration>> = vec![
            Box::new(FnMigration::new(1, "trip", move |tx| {
                trip.store(true, Ordering::SeqCst);
                tx.execute_batch("create table t (n int)")
                    .map_err(|e| Error::Database(e.to_string()))
            })),
            sql(2, "insert into t values (1)"),
        ];
        let mut migrator = Migrator::new(
            &conn,
            migrations,
            MigratorOptions::new().cancel_flag(cancel),
        )
        .unwrap();

        let err = migrator.migrate().unwrap_err();
        assert!(matches!(err, Error::Cancelled { version: 2 }));
        assert_eq!(migrator.version().unwrap(), 1);
    }

    #[test]
    fn failed_preparation_is_retried() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("create table schema_version (other int)")
            .unwrap();
        let mut migrator =
            Migrator::new(&conn, vec![sql(1, "select 1")], MigratorOptions::new()).unwrap();
        assert!(matches!(migrator.version(), Err(Error::SchemaSetup(_))));

        conn.execute_batch("drop table schema_version").unwrap();
        assert_eq!(migrator.version().unwrap(), NIL_VERSION);
    }
}
