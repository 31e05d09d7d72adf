use std::path::Path;

use sqlstep_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Names probed by [`ConfigLoader::discover`], in order.
pub const CONFIG_FILENAMES: &[&str] = &["sqlstep.toml", "sqlstep.yml", "sqlstep.yaml"];

/// Loads [`AppConfig`] from TOML or YAML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the config at `path`, picking the format from its extension.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Parse `contents` as the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Load the first well-known config file found in `dir`, if any.
    pub fn discover(dir: &Path) -> Result<Option<AppConfig>> {
        for name in CONFIG_FILENAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Self::load(&candidate).map(Some);
            }
        }
        debug!("no config file found in {}", dir.display());
        Ok(None)
    }
}
