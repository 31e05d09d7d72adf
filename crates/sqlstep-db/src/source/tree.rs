use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Transaction;
use sqlstep_common::{Error, Result};

use super::Collector;
use crate::migrations::{Migration, execute_script};

/// A directory entry inside a [`MigrationTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A read-only tree of migration scripts, such as files bundled into the
/// binary at build time.
///
/// Paths are `/`-separated and relative to the tree root; the root itself is
/// the empty string.
pub trait MigrationTree: Send + Sync {
    /// List the immediate children of `dir`, sorted by name.
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>>;

    /// Read the file at `path`.
    fn read_to_string(&self, path: &str) -> io::Result<String>;
}

/// A tree compiled into the binary as `(path, contents)` pairs.
///
/// ```
/// use sqlstep_db::StaticTree;
///
/// static MIGRATIONS: &[(&str, &str)] = &[
///     ("1_create.sql", "create table t (pk int primary key)"),
///     ("data/2_seed.sql", "insert into t values (1)"),
/// ];
/// let tree = StaticTree::new(MIGRATIONS);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticTree {
    files: &'static [(&'static str, &'static str)],
}

impl StaticTree {
    pub const fn new(files: &'static [(&'static str, &'static str)]) -> Self {
        Self { files }
    }
}

fn normalize(path: &str) -> &str {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path == "." { "" } else { path }
}

impl MigrationTree for StaticTree {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>> {
        let dir = normalize(dir);
        let mut children: BTreeMap<&str, bool> = BTreeMap::new();

        for (path, _) in self.files {
            let path = normalize(path);
            let rest = if dir.is_empty() {
                path
            } else {
                match path.strip_prefix(dir).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child, true);
                }
                None if !rest.is_empty() => {
                    children.entry(rest).or_insert(false);
                }
                None => {}
            }
        }

        if children.is_empty() && !dir.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory in tree: {dir}"),
            ));
        }

        Ok(children
            .into_iter()
            .map(|(name, is_dir)| TreeEntry {
                name: name.to_string(),
                is_dir,
            })
            .collect())
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let wanted = normalize(path);
        self.files
            .iter()
            .find(|(p, _)| normalize(p) == wanted)
            .map(|(_, contents)| contents.to_string())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such file in tree: {wanted}"),
                )
            })
    }
}

/// A tree rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = normalize(path);
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl MigrationTree for DirTree {
    fn read_dir(&self, dir: &str) -> io::Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            entries.push(TreeEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path))
    }
}

/// A migration read from a [`MigrationTree`] when it runs.
#[derive(Clone)]
pub struct TreeMigration {
    tree: Arc<dyn MigrationTree>,
    path: String,
    version: i64,
}

impl TreeMigration {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for TreeMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeMigration")
            .field("path", &self.path)
            .field("version", &self.version)
            .finish()
    }
}

impl Migration for TreeMigration {
    fn version(&self) -> i64 {
        self.version
    }

    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        let sql = self
            .tree
            .read_to_string(&self.path)
            .map_err(|e| Error::Other(format!("failed to read migration {}: {e}", self.path)))?;
        execute_script(tx, &sql)
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}

/// Load every migration in `tree`, descending into subdirectories.
/// Entries whose name starts with `.` are skipped, directories included.
pub fn tree_migrations(tree: Arc<dyn MigrationTree>) -> Result<Vec<Box<dyn Migration>>> {
    let mut collector = Collector::new();
    walk(&tree, "", &mut collector)?;
    collector.finish()
}

fn walk(tree: &Arc<dyn MigrationTree>, dir: &str, collector: &mut Collector) -> Result<()> {
    let entries = tree.read_dir(dir).map_err(|e| {
        Error::Config(format!("failed to read migration tree at '{dir}': {e}"))
    })?;

    for entry in entries {
        if entry.name.starts_with('.') {
            continue;
        }
        let path = if dir.is_empty() {
            entry.name.clone()
        } else {
            format!("{dir}/{}", entry.name)
        };

        if entry.is_dir {
            walk(tree, &path, collector)?;
        } else {
            collector.offer(&entry.name, &path, |version| TreeMigration {
                tree: Arc::clone(tree),
                path: path.clone(),
                version,
            });
        }
    }
    Ok(())
}
