//! Versioned, transactional schema migrations for SQLite.
//!
//! A [`Migrator`] borrows an open [`rusqlite::Connection`], records applied
//! versions in a version table, and advances the database one migration at a
//! time, each inside its own transaction.
//!
//! ```no_run
//! use rusqlite::Connection;
//! use sqlstep_db::{Migrator, MigratorOptions};
//!
//! # fn main() -> sqlstep_common::Result<()> {
//! let conn = Connection::open_in_memory().unwrap();
//! let scripts = [
//!     "create table t (pk int primary key)",
//!     "insert into t values (1)",
//! ];
//! let mut migrator = Migrator::from_strings(&conn, &scripts, MigratorOptions::new())?;
//! migrator.migrate()?;
//! assert_eq!(migrator.version()?, 2);
//! # Ok(())
//! # }
//! ```

pub mod migrations;
pub mod migrator;
pub mod source;
pub mod version_table;

pub use migrations::{FnMigration, Migration, NIL_VERSION, StringMigration};
pub use migrator::{Migrator, MigratorOptions, ResultFn};
pub use source::{
    DirTree, FileMigration, MigrationTree, StaticTree, TreeEntry, TreeMigration, dir_migrations,
    string_migrations, tree_migrations,
};
pub use version_table::{AppliedVersion, DEFAULT_VERSION_TABLE};
