//! Migration sources: enumerate candidate migrations from a directory, an
//! embedded tree, or a list of scripts.
//!
//! File names follow `<digits>_<name>.<ext>`. Enumeration is lenient: names
//! that do not match, and versions already seen, are logged and skipped.
//! A source that ends up empty is an error.

mod file;
mod strings;
mod tree;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sqlstep_common::{Error, Result};
use tracing::warn;

use crate::migrations::Migration;

pub use file::{FileMigration, dir_migrations};
pub use strings::string_migrations;
pub use tree::{DirTree, MigrationTree, StaticTree, TreeEntry, TreeMigration, tree_migrations};

static VALID_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)_(.*)\.(.*)$").expect("migration filename pattern is valid")
});

/// Parse the version out of a migration file name such as `003_add_index.sql`.
pub fn parse_version(filename: &str) -> Option<i64> {
    let caps = VALID_FILENAME.captures(filename)?;
    caps.get(1)?.as_str().parse::<i64>().ok()
}

/// Accumulates migrations while dropping duplicate versions.
struct Collector {
    seen: HashSet<i64>,
    migrations: Vec<Box<dyn Migration>>,
}

impl Collector {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            migrations: Vec::new(),
        }
    }

    /// Add the entry at `location` if its name yields a fresh version.
    fn offer<M>(&mut self, filename: &str, location: &str, build: impl FnOnce(i64) -> M)
    where
        M: Migration + 'static,
    {
        let Some(version) = parse_version(filename) else {
            warn!("invalid migration filename {location}, skipping");
            return;
        };
        if !self.seen.insert(version) {
            warn!("duplicate version {version} for {location}, skipping");
            return;
        }
        self.migrations.push(Box::new(build(version)));
    }

    fn finish(self) -> Result<Vec<Box<dyn Migration>>> {
        if self.migrations.is_empty() {
            return Err(Error::Config("no migrations found".into()));
        }
        Ok(self.migrations)
    }
}
