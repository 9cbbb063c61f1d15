//! Durable reconnect identities for relink.
//!
//! This crate provides a SQLite-backed [`IdentityStore`](relink_core::IdentityStore)
//! so that the peripherals a connection manager was asked to keep connected
//! are reconnected after the process restarts.
//!
//! # Features
//!
//! - One durable record per namespace, written with a full fsync
//! - Reconnect identifiers kept in insertion order under
//!   [`IDENTITY_NAMESPACE`] as a JSON array
//! - Direct record access for diagnostics and tooling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relink_core::{BtleAdapter, ManagerBuilder};
//! use relink_store::Store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open_default()?);
//! println!("{} devices to reconnect", store.identities()?.len());
//!
//! let (manager, _worker) = ManagerBuilder::new(BtleAdapter::first().await?)
//!     .identity_store(store)
//!     .spawn()
//!     .await?;
//! # let _ = manager;
//! # Ok(())
//! # }
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::{IDENTITY_NAMESPACE, Store, StoredRecord};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/relink/identities.db`
/// - macOS: `~/Library/Application Support/relink/identities.db`
/// - Windows: `C:\Users\<user>\AppData\Local\relink\identities.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("relink")
        .join("identities.db")
}
