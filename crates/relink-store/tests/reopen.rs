//! Durability tests against a database file on disk.

use std::sync::Arc;
use std::time::Duration;

use relink_core::{
    ManagerBuilder, MockAdapter, MockCall, MockHandle, Notification, PeripheralHandle,
};
use relink_store::{IDENTITY_NAMESPACE, Store};
use relink_types::DeviceId;
use tempfile::TempDir;
use tokio::time::timeout;

#[test]
fn test_identities_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("identities.db");

    {
        let store = Store::open(&path).unwrap();
        store.remember(&DeviceId::new("A")).unwrap();
        store.remember(&DeviceId::new("B")).unwrap();
        store.forget(&DeviceId::new("A")).unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.identities().unwrap(), vec![DeviceId::new("B")]);
    assert_eq!(store.path(), Some(path.as_path()));
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("identities.db");

    let store = Store::open(&path).unwrap();
    store.remember(&DeviceId::new("A")).unwrap();
    assert!(path.exists());
}

#[test]
fn test_clear_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("identities.db");

    {
        let store = Store::open(&path).unwrap();
        store.remember(&DeviceId::new("A")).unwrap();
        store.clear_identities().unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert!(store.identities().unwrap().is_empty());
    assert!(store.get_record(IDENTITY_NAMESPACE).unwrap().is_none());
}

#[tokio::test]
async fn test_manager_reconnects_from_reopened_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("identities.db");
    let sensor = MockHandle::new("AA:01", Some("Sensor"));

    // First process: connect, then stop
    {
        let store = Arc::new(Store::open(&path).unwrap());
        let adapter = MockAdapter::new();
        adapter.add_peripheral(sensor.clone());
        let (manager, worker) = ManagerBuilder::new(adapter.clone())
            .identity_store(store)
            .spawn()
            .await
            .unwrap();
        adapter.power_on();
        manager.connect(sensor.id()).await.unwrap();
        manager.shutdown().await.unwrap();
        worker.await.unwrap();
    }

    // Second process: the identity comes back from disk
    let store = Arc::new(Store::open(&path).unwrap());
    assert_eq!(store.identities().unwrap(), vec![sensor.id()]);

    let adapter = MockAdapter::new();
    adapter.add_peripheral(sensor.clone());
    let (manager, worker) = ManagerBuilder::new(adapter.clone())
        .identity_store(store)
        .spawn()
        .await
        .unwrap();
    let mut notifications = manager.subscribe();
    adapter.power_on();

    let will_connect = timeout(Duration::from_secs(5), async {
        loop {
            if let Notification::WillConnect { device } = notifications.recv().await.unwrap() {
                return device;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(will_connect.id, sensor.id());

    manager.snapshot().await.unwrap();
    assert_eq!(adapter.connect_count(&sensor.id()), 1);
    assert!(
        adapter
            .calls()
            .contains(&MockCall::ResolveHandles(vec![sensor.id()]))
    );

    manager.shutdown().await.unwrap();
    worker.await.unwrap();
}
