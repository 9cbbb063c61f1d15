//! Command implementations for the CLI.

mod config;
mod identities;
mod watch;

pub use config::cmd_config;
pub use identities::cmd_identities;
pub use watch::{WatchOptions, cmd_watch};
