//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "relink")]
#[command(author, version, about = "Keep Bluetooth LE peripherals connected", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output (also honors NO_COLOR)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "RELINK_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Identity database (overrides `store_path` in the config file)
    #[arg(long, global = true, env = "RELINK_STORE", value_name = "PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan, connect and report every lifecycle event until Ctrl-C
    Watch(WatchArgs),

    /// Manage remembered reconnect identities
    Identities {
        #[command(subcommand)]
        action: IdentitiesAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for the watch command
#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Only report peripherals advertising this service (repeatable)
    #[arg(short, long = "service", value_name = "UUID")]
    pub services: Vec<Uuid>,

    /// Report every advertisement, not only the first per peripheral
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Auto-connect peripherals whose name contains PATTERN
    #[arg(short, long, value_name = "PATTERN")]
    pub name: Option<String>,

    /// Minimum signal strength for auto-connect
    #[arg(long, value_name = "DBM", allow_negative_numbers = true)]
    pub rssi: Option<i16>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only reconnect remembered peripherals; do not scan
    #[arg(long)]
    pub no_scan: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum IdentitiesAction {
    /// List remembered identifiers
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Remember an identifier for reconnection
    Add {
        /// Peripheral identifier (address or platform UUID)
        id: String,
    },
    /// Forget an identifier
    Remove {
        /// Peripheral identifier (address or platform UUID)
        id: String,
    },
    /// Forget every identifier
    Clear,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
