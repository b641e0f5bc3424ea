//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sum the integers 0..N with map-reduce
    Sum {
        /// Number of integers to sum
        #[arg(long, value_name = "N", default_value = "10000")]
        tasks: u64,

        /// Mapper and reducer count (overrides configuration)
        #[arg(long, value_name = "W")]
        workers: Option<usize>,
    },

    /// Count words across text files with map-reduce
    WordCount {
        /// Files to read, one task per line
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Mapper and reducer count (overrides configuration)
        #[arg(long, value_name = "W")]
        workers: Option<usize>,

        /// How many of the most frequent words to print
        #[arg(long, value_name = "K", default_value = "10")]
        top: usize,
    },

    /// Square the integers 0..N on the worker pool
    Square {
        /// Number of integers to square
        #[arg(long, value_name = "N", default_value = "10000")]
        tasks: u64,

        /// Tasks per dispatched batch (overrides configuration)
        #[arg(long, value_name = "B")]
        batch_size: Option<usize>,

        /// Worker count (overrides configuration)
        #[arg(long, value_name = "W")]
        workers: Option<usize>,

        /// Give every worker its own queue instead of one shared queue
        #[arg(long)]
        per_worker_queues: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Sample,

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long = "config-file", value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}
