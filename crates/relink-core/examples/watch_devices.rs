//! Example: Keeping Peripherals Connected
//!
//! This example scans for peripherals whose name contains a pattern,
//! connects to each one it sees, and prints every lifecycle transition
//! until Ctrl-C. Devices that drop their link are reconnected
//! automatically.
//!
//! Run with: `cargo run --example watch_devices -- <NAME_PATTERN>`

use std::env;
use std::sync::Arc;

use relink_core::{
    BtleAdapter, LoggingDelegate, ManagerBuilder, ManagerConfig, NameFilter, Notification,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let pattern = if args.len() > 1 {
        args[1].clone()
    } else {
        eprintln!("Usage: {} <NAME_PATTERN>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} thermo", args[0]);
        std::process::exit(1);
    };

    let adapter = BtleAdapter::first().await?;
    let (manager, worker) = ManagerBuilder::new(adapter)
        .config(ManagerConfig::new().rssi_for_connect(-90))
        .admission(NameFilter::new(pattern.as_str()))
        .delegate(Arc::new(LoggingDelegate))
        .spawn()
        .await?;

    let mut notifications = manager.subscribe();
    manager.scan(Vec::new(), false).await?;
    println!("Watching for devices matching {:?} (Ctrl-C to stop)", pattern);
    println!();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = notifications.recv() => {
                let Ok(notification) = received else { break };
                match notification {
                    Notification::Connected { device } => {
                        println!("+ {} ({})", device.display_name(), device.id);
                    }
                    Notification::Disconnected { device, retry, reason } => {
                        let next = if retry { "reconnecting" } else { "gone" };
                        println!("- {} ({:?}, {})", device.display_name(), reason, next);
                    }
                    Notification::ConnectFailed { device, error, attempt, .. } => {
                        println!("! {} attempt {}: {}", device.display_name(), attempt, error);
                    }
                    _ => {}
                }
            }
        }
    }

    manager.shutdown().await?;
    worker.await?;
    Ok(())
}
