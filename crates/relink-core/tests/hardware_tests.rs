//! Hardware integration tests for relink-core
//!
//! These tests require a Bluetooth adapter and should be run with:
//! ```
//! cargo test --package relink-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the peripheral via environment variables:
//! - `RELINK_DEVICE`: identifier of a connectable peripheral in range
//! - `RELINK_NAME`: name fragment used to auto-connect during a scan
//!
//! Example:
//! ```
//! RELINK_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package relink-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::time::Duration;

use relink_core::{
    AdapterPower, BtleAdapter, ManagerBuilder, ManagerConfig, NameFilter, Notification,
    NotificationReceiver,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Wait for the first notification matching `predicate`.
async fn wait_for(
    notifications: &mut NotificationReceiver,
    predicate: impl Fn(&Notification) -> bool,
) -> Option<Notification> {
    timeout(BLE_TIMEOUT, async {
        loop {
            match notifications.recv().await {
                Ok(notification) if predicate(&notification) => return Some(notification),
                Ok(notification) => println!("  {:?}", notification),
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

// =============================================================================
// Adapter Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_reports_power_state() {
    let adapter = match timeout(BLE_TIMEOUT, BtleAdapter::first()).await {
        Ok(Ok(adapter)) => adapter,
        Ok(Err(e)) => panic!("No adapter: {}", e),
        Err(_) => panic!("Adapter lookup timed out"),
    };

    let (manager, worker) = ManagerBuilder::new(adapter)
        .spawn()
        .await
        .expect("manager should start");
    let mut notifications = manager.subscribe();

    let power = wait_for(&mut notifications, |n| {
        matches!(n, Notification::PowerChanged { .. })
    })
    .await;
    println!("Power notification: {:?}", power);

    let snapshot = manager.snapshot().await.expect("snapshot");
    assert_ne!(snapshot.power, AdapterPower::Unknown);

    manager.shutdown().await.expect("shutdown");
    let _ = worker.await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_reports_discoveries() {
    let adapter = BtleAdapter::first().await.expect("adapter");
    let (manager, worker) = ManagerBuilder::new(adapter)
        .admission(relink_core::RejectAll)
        .spawn()
        .await
        .expect("manager should start");
    let mut notifications = manager.subscribe();

    manager.scan(Vec::new(), false).await.expect("scan");
    let discovered = wait_for(&mut notifications, |n| {
        matches!(n, Notification::Discovered { .. })
    })
    .await;

    match discovered {
        Some(Notification::Discovered { device, rssi, .. }) => {
            println!("Discovered {} ({}) at {:?} dBm", device.display_name(), device.id, rssi);
        }
        _ => println!("No advertisements seen within {:?}", BLE_TIMEOUT),
    }

    manager.shutdown().await.expect("shutdown");
    let _ = worker.await;
}

// =============================================================================
// Connection Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_disconnect_cycle() {
    let Some(device) = env_value("RELINK_DEVICE") else {
        println!("SKIP: No device configured (set RELINK_DEVICE env var)");
        return;
    };

    let adapter = BtleAdapter::first().await.expect("adapter");
    let (manager, worker) = ManagerBuilder::new(adapter)
        .spawn()
        .await
        .expect("manager should start");
    let mut notifications = manager.subscribe();

    manager.connect(device.as_str()).await.expect("connect");
    let connected = wait_for(&mut notifications, |n| {
        matches!(n, Notification::Connected { .. })
    })
    .await;
    assert!(connected.is_some(), "Device should connect within {:?}", BLE_TIMEOUT);
    println!("Connected to {}", device);

    manager.disconnect(device.as_str()).await.expect("disconnect");
    let disconnected = wait_for(&mut notifications, |n| {
        matches!(n, Notification::Disconnected { .. })
    })
    .await;
    match disconnected {
        Some(Notification::Disconnected { retry, .. }) => assert!(!retry),
        _ => panic!("Disconnect was not reported"),
    }

    let snapshot = manager.snapshot().await.expect("snapshot");
    assert!(!snapshot.persisted.iter().any(|id| id.as_str() == device));

    manager.shutdown().await.expect("shutdown");
    let _ = worker.await;
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_auto_connect_by_name() {
    let Some(name) = env_value("RELINK_NAME") else {
        println!("SKIP: No name configured (set RELINK_NAME env var)");
        return;
    };

    let adapter = BtleAdapter::first().await.expect("adapter");
    let (manager, worker) = ManagerBuilder::new(adapter)
        .config(ManagerConfig::new().rssi_for_connect(-90))
        .admission(NameFilter::new(&name))
        .spawn()
        .await
        .expect("manager should start");
    let mut notifications = manager.subscribe();

    manager.scan(Vec::new(), false).await.expect("scan");
    let connected = wait_for(&mut notifications, |n| {
        matches!(n, Notification::Connected { .. })
    })
    .await;

    match connected {
        Some(Notification::Connected { device }) => {
            println!("Auto-connected to {} ({})", device.display_name(), device.id);
            let snapshot = manager.snapshot().await.expect("snapshot");
            assert!(snapshot.is_connected(&device.id));
            assert!(!snapshot.scanning);
            manager.disconnect(device.id).await.expect("disconnect");
        }
        _ => println!("No device matching {:?} connected", name),
    }

    manager.shutdown().await.expect("shutdown");
    let _ = worker.await;
}
