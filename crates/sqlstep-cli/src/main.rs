mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "sqlstep", version, about = "Apply versioned SQL migrations to SQLite")]
struct Cli {
    /// Config file (TOML or YAML). Defaults to sqlstep.{toml,yml,yaml} in the working directory.
    #[arg(short, long, env = "SQLSTEP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file.
    #[arg(short, long, env = "SQLSTEP_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Migrations directory or file:// URI.
    #[arg(short, long, env = "SQLSTEP_MIGRATIONS", global = true)]
    migrations: Option<String>,

    /// Table recording applied versions.
    #[arg(short, long, env = "SQLSTEP_VERSION_TABLE", global = true)]
    table: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current database version
    Version,
    /// Apply all pending migrations
    Up,
    /// Migrate up to and including VERSION
    To {
        version: i64,
    },
    /// Show current, latest and pending versions
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List applied versions with their timestamps
    History,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(
        cli.config.as_deref(),
        cli.database,
        cli.migrations,
        cli.table,
        cli.json_logs,
    )?;

    init_tracing(&settings);

    match cli.command {
        Commands::Version => commands::version(&settings),
        Commands::Up => commands::up(&settings, None),
        Commands::To { version } => commands::up(&settings, Some(version)),
        Commands::Status { json } => commands::status(&settings, json),
        Commands::History => commands::history(&settings),
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if settings.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
