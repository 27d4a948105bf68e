//! odin-softioc CLI
//!
//! Runs the soft IOC demo adapter and inspects the PVs it publishes.
//!
//! # Commands
//!
//! - `run` - Start the bridge and serve until interrupted
//! - `pvs` - List the PVs the adapter publishes
//! - `get` - Read a parameter path
//! - `put` - Write a parameter path and show the result

mod commands;

use clap::{Parser, Subcommand};
use odin_softioc_server::AdapterConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bridge an odin-control parameter tree to an EPICS soft IOC.
#[derive(Parser)]
#[command(name = "odin-softioc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Adapter configuration file (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// IOC device prefix, overriding the configuration file
    #[arg(global = true, short, long)]
    prefix: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge and serve until interrupted
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Start the background task regardless of the configuration
        #[arg(short, long)]
        background_task: bool,
    },

    /// List the PVs the adapter publishes
    Pvs {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read a parameter path
    Get {
        /// Path in the parameter tree, e.g. `background_task/interval`
        #[arg(default_value = "")]
        path: String,

        /// Include parameter metadata
        #[arg(short, long)]
        metadata: bool,
    },

    /// Write a parameter path and show the result
    Put {
        /// Path in the parameter tree
        path: String,

        /// JSON value to write, e.g. `5` or `{"interval": 2.0}`
        value: String,
    },

    /// Show version information
    Version,
}

fn load_config(cli: &Cli) -> Result<AdapterConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AdapterConfig::from_file(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(prefix) = &cli.prefix {
        config.ioc_device_prefix = prefix.clone();
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Run {
            duration,
            background_task,
        } => {
            let mut config = load_config(&cli)?;
            if *background_task {
                config.background_task_enable = true;
            }
            commands::run::run(config, *duration)?;
        }
        Commands::Pvs { format } => {
            commands::pvs::run(load_config(&cli)?, format)?;
        }
        Commands::Get { path, metadata } => {
            commands::get::run(load_config(&cli)?, path, *metadata)?;
        }
        Commands::Put { path, value } => {
            commands::put::run(load_config(&cli)?, path, value)?;
        }
        Commands::Version => {
            println!("odin-softioc CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("odin-softioc core v{}", odin_softioc_core::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_flag_overrides_default() {
        let cli = Cli::try_parse_from(["odin-softioc", "--prefix", "CLI", "pvs"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.ioc_device_prefix, "CLI");
        assert!(matches!(cli.command, Commands::Pvs { ref format } if format == "text"));
    }

    #[test]
    fn put_takes_path_and_value() {
        let cli = Cli::try_parse_from(["odin-softioc", "put", "task_count", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Put { ref path, ref value } if path == "task_count" && value == "5"
        ));
        assert!(Cli::try_parse_from(["odin-softioc", "put", "task_count"]).is_err());
    }
}
