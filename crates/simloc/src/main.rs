#![forbid(unsafe_code)]

//! `simloc`: manage saved simulator locations from the command line.
//!
//! ```text
//! simloc list
//! simloc add "Apple Park" 37.3349 -122.0090
//! simloc remove "Apple Park"
//! simloc watch --count 1
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use simloc::logging::{self, LogFormat};
use simloc::{AddOutcome, App, AppConfig, AppError};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "simloc", version)]
#[command(about = "Manage saved GPS locations for simulated devices")]
struct Cli {
    /// Config file (default: <config_dir>/simloc/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Preferences file, overriding the configured one
    #[arg(long, value_name = "PATH", global = true)]
    store: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print saved locations
    List,
    /// Save a new location
    Add {
        address: String,
        #[arg(allow_hyphen_values = true)]
        latitude: String,
        #[arg(allow_hyphen_values = true)]
        longitude: String,
    },
    /// Delete a saved location by address
    Remove { address: String },
    /// Delete all saved locations
    Clear,
    /// Print the list whenever another process changes it
    Watch {
        /// Poll interval (default: from config)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// Exit after this many changes
        #[arg(long, value_name = "N")]
        count: Option<usize>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("simloc: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = AppConfig::discover(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store_path = Some(store);
    }
    let format = if cli.json { LogFormat::Json } else { LogFormat::Text };
    logging::init(&config.log_filter, format)?;

    let app = App::open(config)?;
    match cli.command {
        Command::List => {
            let locations = app.list();
            if locations.is_empty() {
                println!("no saved locations");
            }
            for location in locations {
                println!("{location}");
            }
        }
        Command::Add {
            address,
            latitude,
            longitude,
        } => match app.add(&address, &latitude, &longitude)? {
            AddOutcome::Added(location) => println!("saved {location}"),
            AddOutcome::AlreadySaved(location) => println!("already saved: {location}"),
        },
        Command::Remove { address } => {
            let removed = app.remove(&address)?;
            println!("removed {removed}");
        }
        Command::Clear => {
            app.clear()?;
            println!("cleared saved locations");
        }
        Command::Watch { interval_ms, count } => {
            let interval = interval_ms.map_or_else(|| app.config().poll_interval(), Duration::from_millis);
            tracing::info!(?interval, "watching for changes");
            app.watch(interval, count, |list| {
                println!("--- {} saved location(s)", list.len());
                for location in list {
                    println!("{location}");
                }
            })?;
        }
    }
    Ok(())
}
