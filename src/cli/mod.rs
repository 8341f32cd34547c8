use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage::{self, RecordStore};

pub mod commands;

use self::commands::{AddArgs, ListArgs, RemoveArgs};

const LOG_FILE: &str = "user-registry.log";

#[derive(Parser, Debug)]
#[command(
    name = "user-registry",
    version,
    about = "Terminal registry of personal records with search, paging and in-place editing"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over USER_REGISTRY_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over USER_REGISTRY_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Validate and append a record from the command line
    Add(AddArgs),
    /// Print one page of records, optionally filtered
    List(ListArgs),
    /// Remove the record at a 0-based position
    Remove(RemoveArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);
    let log_file = matches!(command, Commands::Tui).then(|| paths.log_dir.join(LOG_FILE));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let handle = storage::init(&paths, &config.storage)?;
    let store = RecordStore::load_with_key(handle, config.storage.records_key.clone())?;

    let config = Arc::new(config);
    match command {
        Commands::Tui => {
            if !atty::is(atty::Stream::Stdout) {
                bail!("the interactive UI needs a terminal; use `list` or `add` instead");
            }
            commands::run_tui(config, store)
        }
        Commands::Add(args) => commands::add_record(config, store, args),
        Commands::List(args) => commands::list_records(config, store, args),
        Commands::Remove(args) => commands::remove_record(store, args),
    }
}

/// Installs the global subscriber once. With a log file the output goes
/// there instead of stderr so it cannot corrupt the alternate screen.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}
