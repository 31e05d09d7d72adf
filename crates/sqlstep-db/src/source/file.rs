use std::path::{Path, PathBuf};

use rusqlite::Transaction;
use sqlstep_common::{Error, Result};
use tracing::debug;

use super::{Collector, parse_version};
use crate::migrations::{Migration, execute_script};

/// A migration stored as a script file on disk. The file is read when the
/// migration runs, not when it is discovered.
#[derive(Debug, Clone)]
pub struct FileMigration {
    path: PathBuf,
    version: i64,
}

impl FileMigration {
    /// Build a migration from `path`, taking the version from its file name.
    /// Returns `None` if the name does not follow `<digits>_<name>.<ext>`.
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let version = parse_version(path.file_name()?.to_str()?)?;
        Some(Self { path, version })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Migration for FileMigration {
    fn version(&self) -> i64 {
        self.version
    }

    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        let sql = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Other(format!(
                "failed to read migration {}: {e}",
                self.path.display()
            ))
        })?;
        execute_script(tx, &sql)
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("v{}", self.version))
    }
}

/// Resolve a directory location. Accepts plain paths and `file://` URIs;
/// whatever follows the scheme is treated as a path, so `file://testdata`
/// names the relative directory `testdata`.
pub(crate) fn resolve_dir(uri: &str) -> Result<PathBuf> {
    let raw = uri.strip_prefix("file://").unwrap_or(uri);
    let cwd = || {
        std::env::current_dir()
            .map_err(|e| Error::Config(format!("failed to resolve working directory: {e}")))
    };

    if raw.is_empty() {
        return cwd();
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(cwd()?.join(path))
    }
}

/// Load every migration file directly inside the directory at `uri`.
///
/// Subdirectories are not entered. Entries are visited in name order, so
/// of two files sharing a version the lexically first one wins.
pub fn dir_migrations(uri: &str) -> Result<Vec<Box<dyn Migration>>> {
    let dir = resolve_dir(uri)?;
    debug!("scanning migrations in {}", dir.display());

    let entries = std::fs::read_dir(&dir).map_err(|e| {
        Error::Config(format!(
            "failed to read migrations directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();

    let mut collector = Collector::new();
    for path in files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let location = path.display().to_string();
        collector.offer(&filename, &location, |version| FileMigration {
            path: path.clone(),
            version,
        });
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, sql: &str) {
        fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn loads_valid_files_and_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_create.sql", "create table t (pk int)");
        write(dir.path(), "2_insert.sql", "insert into t values (1)");
        write(dir.path(), "README.md", "not a migration");
        write(dir.path(), "x_bad.sql", "select 1");
        fs::create_dir(dir.path().join("3_nested.sql")).unwrap();

        let migrations = dir_migrations(dir.path().to_str().unwrap()).unwrap();
        let mut versions: Vec<i64> = migrations.iter().map(|m| m.version()).collect();
        versions.sort();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn keeps_first_of_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_a.sql", "select 1");
        write(dir.path(), "1_b.sql", "select 2");

        let migrations = dir_migrations(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name(), "1_a.sql");
    }

    #[test]
    fn accepts_file_uris() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10_init.sql", "select 1");

        let uri = format!("file://{}", dir.path().display());
        let migrations = dir_migrations(&uri).unwrap();
        assert_eq!(migrations[0].version(), 10);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "nothing here");

        let Err(err) = dir_migrations(dir.path().to_str().unwrap()) else {
            panic!("a directory without migrations should not load");
        };
        assert!(matches!(err, Error::Config(ref msg) if msg == "no migrations found"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(dir_migrations(missing.to_str().unwrap()).is_err());
    }

    #[test]
    fn relative_locations_resolve_against_working_directory() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_dir("").unwrap(), cwd);
        assert_eq!(resolve_dir("file://").unwrap(), cwd);
        assert_eq!(resolve_dir("file://testdata").unwrap(), cwd.join("testdata"));
        assert_eq!(resolve_dir("./sql").unwrap(), cwd.join("./sql"));
        assert_eq!(resolve_dir("/srv/sql").unwrap(), PathBuf::from("/srv/sql"));
    }

    #[test]
    fn file_migration_reads_script_at_run_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_create.sql");
        let migration = FileMigration::new(&path).unwrap();
        write(dir.path(), "1_create.sql", "create table late (n int)");

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let tx = conn.unchecked_transaction().unwrap();
        migration.run(&tx).unwrap();
        tx.commit().unwrap();
        assert!(FileMigration::new(dir.path().join("create.sql")).is_none());
    }
}
