use std::io::{self, IsTerminal, Write};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;

use cli::{Cli, Commands};
use commands::{WatchOptions, cmd_config, cmd_identities, cmd_watch};
use config::Config;
use relink_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let no_color =
        cli.no_color || std::env::var_os("NO_COLOR").is_some() || !io::stdout().is_terminal();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path);
    let store_path = config.resolve_store_path(cli.store.clone());
    tracing::debug!(
        "Config: {}, store: {}",
        config_path.display(),
        store_path.display()
    );

    let output = match cli.command {
        Commands::Watch(args) => {
            let options = WatchOptions::resolve(args, &config, store_path);
            return cmd_watch(options, no_color).await;
        }
        Commands::Identities { action } => {
            let store = Store::open(&store_path)?;
            cmd_identities(&store, action, no_color)?
        }
        Commands::Config { action } => cmd_config(&config_path, &config, action, no_color)?,
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
