use sqlstep_common::{Error, Result};

use crate::migrations::{Migration, StringMigration};

/// Turn a list of scripts into migrations numbered 1..=N in list order.
pub fn string_migrations<S: AsRef<str>>(scripts: &[S]) -> Result<Vec<Box<dyn Migration>>> {
    if scripts.is_empty() {
        return Err(Error::Config("no migrations found".into()));
    }

    Ok(scripts
        .iter()
        .zip(1..)
        .map(|(sql, version)| {
            Box::new(StringMigration::new(version, sql.as_ref())) as Box<dyn Migration>
        })
        .collect())
}
