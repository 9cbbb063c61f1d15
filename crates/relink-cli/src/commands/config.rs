//! Config command implementation.

use std::path::Path;

use anyhow::{Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;
use crate::format::format_success;

/// Run a config action for the file at `path` and return what to print.
pub fn cmd_config(
    path: &Path,
    config: &Config,
    action: ConfigAction,
    no_color: bool,
) -> Result<String> {
    match action {
        ConfigAction::Path => Ok(format!("{}\n", path.display())),
        ConfigAction::Show => config.to_toml(),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config file already exists: {}. Use --force to overwrite it.",
                    path.display()
                );
            }
            Config::default().save(path)?;
            let message = format!("Wrote {}", path.display());
            Ok(format_success(&message, no_color) + "\n")
        }
    }
}
