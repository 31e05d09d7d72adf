use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("schema setup error: {0}")]
    SchemaSetup(String),

    #[error("non-contiguous migration: {current} -> {next}")]
    Sequence { current: i64, next: i64 },

    /// A migration or its version insert failed; `source` is the cause.
    #[error("migration {version} failed: {}", .source.detail())]
    Apply { version: i64, source: Box<Error> },

    #[error("migration cancelled before version {version}")]
    Cancelled { version: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The migration version this error is tied to, if any.
    pub fn version(&self) -> Option<i64> {
        match self {
            Error::Sequence { next, .. } => Some(*next),
            Error::Apply { version, .. } | Error::Cancelled { version } => Some(*version),
            _ => None,
        }
    }

    /// The message without its category prefix.
    pub fn detail(&self) -> String {
        match self {
            Error::Config(msg)
            | Error::SchemaSetup(msg)
            | Error::Database(msg)
            | Error::Other(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
