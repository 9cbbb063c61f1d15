//! Watch command implementation.
//!
//! Runs a connection manager against the first host adapter until Ctrl-C.
//! Remembered identities are reconnected as soon as the adapter is powered,
//! peripherals matching `--name` are connected when discovered, and every
//! lifecycle notification is printed as it happens.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use relink_core::{BtleAdapter, ManagerBuilder, ManagerConfig, NameFilter, RejectAll};
use relink_store::Store;

use crate::cli::{OutputFormat, WatchArgs};
use crate::config::Config;
use crate::format::{format_notification_json, format_notification_text};

/// Effective watch settings: command-line arguments over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub services: Vec<Uuid>,
    pub allow_duplicates: bool,
    pub name: Option<String>,
    pub manager: ManagerConfig,
    pub connect_timeout: Duration,
    pub format: OutputFormat,
    pub scan: bool,
    pub store_path: PathBuf,
}

impl WatchOptions {
    pub fn resolve(args: WatchArgs, config: &Config, store_path: PathBuf) -> Self {
        let services = if args.services.is_empty() {
            config.scan.services.clone()
        } else {
            args.services
        };

        let mut manager = config.manager.to_manager_config();
        if let Some(dbm) = args.rssi {
            manager = manager.rssi_for_connect(dbm);
        }

        Self {
            services,
            allow_duplicates: args.allow_duplicates || config.scan.allow_duplicates,
            name: args.name.or_else(|| config.scan.name.clone()),
            manager,
            connect_timeout: config.manager.connect_timeout(),
            format: args.format,
            scan: !args.no_scan,
            store_path,
        }
    }
}

pub async fn cmd_watch(options: WatchOptions, no_color: bool) -> Result<()> {
    let store = Store::open(&options.store_path).with_context(|| {
        format!(
            "Failed to open identity store: {}",
            options.store_path.display()
        )
    })?;
    let remembered = store.identities()?.len();
    info!(
        "Using identity store {} ({} remembered)",
        options.store_path.display(),
        remembered
    );

    let adapter = BtleAdapter::first()
        .await?
        .connect_timeout(options.connect_timeout);

    let builder = ManagerBuilder::new(adapter)
        .config(options.manager.clone())
        .identity_store(Arc::new(store));
    let builder = match &options.name {
        Some(pattern) => builder.admission(NameFilter::new(pattern.as_str())),
        None => builder.admission(RejectAll),
    };
    let (manager, worker) = builder.spawn().await?;

    let mut notifications = manager.subscribe();
    if options.scan {
        manager
            .scan(options.services.clone(), options.allow_duplicates)
            .await?;
    }
    eprintln!("Watching peripherals (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => {
                    let now = OffsetDateTime::now_utc();
                    let line = match options.format {
                        OutputFormat::Text => {
                            format_notification_text(&notification, now, no_color)
                        }
                        OutputFormat::Json => format_notification_json(&notification, now)?,
                    };
                    println!("{}", line);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind; {} notifications skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    warn!("Connection manager stopped");
                    break;
                }
            }
        }
    }

    // Already gone when the notification stream closed on its own
    if !manager.is_closed() {
        manager.shutdown().await?;
    }
    worker.await.context("Connection manager task failed")?;
    Ok(())
}
