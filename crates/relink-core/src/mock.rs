//! Mock adapter and recording collaborators for testing.
//!
//! This module provides an in-memory [`Adapter`] that can be driven from a
//! test without Bluetooth hardware, plus a delegate and a service binder that
//! record what the manager did.
//!
//! # Features
//!
//! - **Event injection**: power changes, discoveries, connect outcomes, link
//!   loss and restore-state events are emitted on demand
//! - **Call recording**: every adapter operation the manager issues is kept
//!   in order for assertions
//! - **Auto-respond mode**: connects complete and cancels disconnect on their
//!   own, like a cooperative radio
//! - **Failure injection**: connect requests can be rejected synchronously
//!
//! # Example
//!
//! ```
//! use relink_core::{ManagerBuilder, MockAdapter, MockHandle, PeripheralHandle};
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapter = MockAdapter::new();
//!     adapter.set_auto_respond(true);
//!     let sensor = MockHandle::new("AA:01", Some("Sensor"));
//!     adapter.add_peripheral(sensor.clone());
//!
//!     let (manager, _worker) = ManagerBuilder::new(adapter.clone()).spawn().await.unwrap();
//!     adapter.power_on();
//!     manager.connect("AA:01").await.unwrap();
//!
//!     let snapshot = manager.snapshot().await.unwrap();
//!     assert_eq!(adapter.connect_count(&sensor.id()), 1);
//!     assert!(snapshot.persisted.contains(&sensor.id()));
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use relink_types::{AdapterPower, Advertisement, DeviceId};

use crate::adapter::{Adapter, AdapterEvent, AdapterEventStream, LinkState, PeripheralHandle};
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::events::{ConnectionDelegate, DisconnectReason, Notification};
use crate::service::{ServiceBinder, ServiceModel};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Peripheral handle for [`MockAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockHandle {
    id: DeviceId,
    name: Option<String>,
}

impl MockHandle {
    /// Create a handle with an identifier and optional cached name.
    pub fn new(id: &str, name: Option<&str>) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.map(str::to_string),
        }
    }
}

impl PeripheralHandle for MockHandle {
    fn id(&self) -> DeviceId {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

/// An adapter operation issued by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_scan`.
    StartScan {
        services: Vec<Uuid>,
        allow_duplicates: bool,
    },
    /// `stop_scan`.
    StopScan,
    /// `connect`.
    Connect(DeviceId),
    /// `cancel_connection`.
    CancelConnection(DeviceId),
    /// `resolve_handles`.
    ResolveHandles(Vec<DeviceId>),
}

struct MockInner {
    events_tx: Mutex<Option<mpsc::UnboundedSender<AdapterEvent<MockHandle>>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<AdapterEvent<MockHandle>>>>,
    calls: Mutex<Vec<MockCall>>,
    peripherals: Mutex<IndexMap<DeviceId, MockHandle>>,
    links: Mutex<HashMap<DeviceId, LinkState>>,
    reject_connect: Mutex<Option<String>>,
    auto_respond: AtomicBool,
}

/// In-memory adapter for tests.
///
/// Clones share state, so a test keeps one clone to drive events while the
/// manager owns another.
#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<MockInner>,
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("calls", &lock(&self.inner.calls).len())
            .field("peripherals", &lock(&self.inner.peripherals).len())
            .field("auto_respond", &self.inner.auto_respond.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create an adapter with no known peripherals, in manual mode.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                events_tx: Mutex::new(Some(tx)),
                events_rx: Mutex::new(Some(rx)),
                calls: Mutex::new(Vec::new()),
                peripherals: Mutex::new(IndexMap::new()),
                links: Mutex::new(HashMap::new()),
                reject_connect: Mutex::new(None),
                auto_respond: AtomicBool::new(false),
            }),
        }
    }

    // ==================== Configuration ====================

    /// Complete connects and cancels automatically.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.inner.auto_respond.store(enabled, Ordering::Relaxed);
    }

    /// Reject every connect request with `message` (None = accept).
    pub fn set_reject_connect(&self, message: Option<&str>) {
        *lock(&self.inner.reject_connect) = message.map(str::to_string);
    }

    /// Make a peripheral resolvable through `resolve_handles`.
    pub fn add_peripheral(&self, handle: MockHandle) {
        lock(&self.inner.peripherals).insert(handle.id(), handle);
    }

    /// Forget a peripheral.
    pub fn remove_peripheral(&self, id: &DeviceId) {
        lock(&self.inner.peripherals).shift_remove(id);
    }

    /// Override the radio-level link state of a peripheral.
    pub fn set_link_state(&self, id: &DeviceId, state: LinkState) {
        lock(&self.inner.links).insert(id.clone(), state);
    }

    // ==================== Event injection ====================

    /// Emit a raw adapter event.
    pub fn emit(&self, event: AdapterEvent<MockHandle>) {
        if let Some(tx) = lock(&self.inner.events_tx).as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Emit a power change. Leaving the powered-on state drops every link.
    pub fn set_power(&self, state: AdapterPower) {
        if !state.is_powered_on() {
            lock(&self.inner.links).clear();
        }
        self.emit(AdapterEvent::PowerChanged(state));
    }

    /// Emit `PowerChanged(PoweredOn)`.
    pub fn power_on(&self) {
        self.set_power(AdapterPower::PoweredOn);
    }

    /// Emit `PowerChanged(PoweredOff)`.
    pub fn power_off(&self) {
        self.set_power(AdapterPower::PoweredOff);
    }

    /// Emit a discovery carrying the handle's name and `rssi`.
    pub fn discover(&self, handle: &MockHandle, rssi: Option<i16>) {
        let advertisement = Advertisement::new(handle.name(), rssi);
        self.discover_with(handle, advertisement);
    }

    /// Emit a discovery with a full advertisement.
    pub fn discover_with(&self, handle: &MockHandle, advertisement: Advertisement) {
        self.add_peripheral(handle.clone());
        self.emit(AdapterEvent::Discovered {
            handle: handle.clone(),
            name: advertisement.local_name.clone().or_else(|| handle.name()),
            rssi: advertisement.rssi,
            advertisement,
        });
    }

    /// Emit a successful connect completion.
    pub fn complete_connect(&self, handle: &MockHandle) {
        self.set_link_state(&handle.id(), LinkState::Connected);
        self.emit(AdapterEvent::ConnectCompleted {
            handle: handle.clone(),
        });
    }

    /// Emit a connect failure.
    pub fn fail_connect(&self, handle: &MockHandle, error: &str) {
        self.set_link_state(&handle.id(), LinkState::Disconnected);
        self.emit(AdapterEvent::ConnectFailed {
            handle: handle.clone(),
            error: error.to_string(),
        });
    }

    /// Emit a disconnect (link loss when not requested).
    pub fn drop_link(&self, handle: &MockHandle, error: Option<&str>) {
        self.set_link_state(&handle.id(), LinkState::Disconnected);
        self.emit(AdapterEvent::Disconnected {
            handle: handle.clone(),
            error: error.map(str::to_string),
        });
    }

    /// Emit a restore-state event.
    pub fn restore(&self, handles: Vec<MockHandle>) {
        for handle in &handles {
            self.add_peripheral(handle.clone());
        }
        self.emit(AdapterEvent::RestoreState { handles });
    }

    /// End the event stream, as if the radio stack went away.
    pub fn close_events(&self) {
        lock(&self.inner.events_tx).take();
    }

    // ==================== Inspection ====================

    /// Every operation issued so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.inner.calls).clone()
    }

    /// Forget recorded operations.
    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    /// Number of `connect` calls for a peripheral.
    pub fn connect_count(&self, id: &DeviceId) -> usize {
        self.count(|call| matches!(call, MockCall::Connect(c) if c == id))
    }

    /// Number of `cancel_connection` calls for a peripheral.
    pub fn cancel_count(&self, id: &DeviceId) -> usize {
        self.count(|call| matches!(call, MockCall::CancelConnection(c) if c == id))
    }

    /// Number of `connect` calls for any peripheral.
    pub fn total_connects(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Connect(_)))
    }

    /// Number of `start_scan` calls.
    pub fn scan_starts(&self) -> usize {
        self.count(|call| matches!(call, MockCall::StartScan { .. }))
    }

    /// Number of `stop_scan` calls.
    pub fn scan_stops(&self) -> usize {
        self.count(|call| matches!(call, MockCall::StopScan))
    }

    /// Radio-level link state of a peripheral.
    pub fn link(&self, id: &DeviceId) -> LinkState {
        lock(&self.inner.links).get(id).copied().unwrap_or_default()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.inner.calls).iter().filter(|c| predicate(*c)).count()
    }

    fn record(&self, call: MockCall) {
        lock(&self.inner.calls).push(call);
    }

    fn auto_respond(&self) -> bool {
        self.inner.auto_respond.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    type Handle = MockHandle;

    async fn start_scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> Result<()> {
        self.record(MockCall::StartScan {
            services,
            allow_duplicates,
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan);
        Ok(())
    }

    async fn connect(&self, handle: &MockHandle, _notify_on_disconnect: bool) -> Result<()> {
        self.record(MockCall::Connect(handle.id()));
        let rejection = lock(&self.inner.reject_connect).clone();
        if let Some(message) = rejection {
            return Err(Error::Io(std::io::Error::other(message)));
        }

        if self.auto_respond() {
            self.complete_connect(handle);
        } else {
            self.set_link_state(&handle.id(), LinkState::Connecting);
        }
        Ok(())
    }

    async fn cancel_connection(&self, handle: &MockHandle) -> Result<()> {
        self.record(MockCall::CancelConnection(handle.id()));
        if self.auto_respond() {
            self.drop_link(handle, None);
        } else {
            self.set_link_state(&handle.id(), LinkState::Disconnecting);
        }
        Ok(())
    }

    async fn resolve_handles(&self, ids: &[DeviceId]) -> Result<Vec<MockHandle>> {
        self.record(MockCall::ResolveHandles(ids.to_vec()));
        let peripherals = lock(&self.inner.peripherals);
        Ok(ids
            .iter()
            .filter_map(|id| peripherals.get(id).cloned())
            .collect())
    }

    async fn link_state(&self, handle: &MockHandle) -> LinkState {
        self.link(&handle.id())
    }

    async fn events(&self) -> Result<AdapterEventStream<MockHandle>> {
        let rx = lock(&self.inner.events_rx)
            .take()
            .ok_or(Error::AdapterEventsTaken)?;
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// Delegate that records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingDelegate {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification received so far.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Kinds of every notification received so far.
    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.notifications).iter().map(Notification::kind).collect()
    }

    fn push(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }
}

impl ConnectionDelegate for RecordingDelegate {
    fn did_discover(&self, device: &DeviceInfo, rssi: Option<i16>, advertisement: &Advertisement) {
        self.push(Notification::Discovered {
            device: device.clone(),
            rssi,
            advertisement: advertisement.clone(),
        });
    }

    fn will_connect(&self, device: &DeviceInfo) {
        self.push(Notification::WillConnect {
            device: device.clone(),
        });
    }

    fn did_connect(&self, device: &DeviceInfo) {
        self.push(Notification::Connected {
            device: device.clone(),
        });
    }

    fn did_disconnect(&self, device: &DeviceInfo, retry: bool, reason: &DisconnectReason) {
        self.push(Notification::Disconnected {
            device: device.clone(),
            retry,
            reason: reason.clone(),
        });
    }

    fn did_fail_to_connect(&self, device: &DeviceInfo, error: &str, attempt: u32, will_retry: bool) {
        self.push(Notification::ConnectFailed {
            device: device.clone(),
            error: error.to_string(),
            attempt,
            will_retry,
        });
    }

    fn power_state_changed(&self, state: AdapterPower) {
        self.push(Notification::PowerChanged { state });
    }
}

/// Service model that counts lifecycle calls.
#[derive(Debug, Default)]
pub struct RecordingModel {
    discovers: AtomicUsize,
    resets: AtomicUsize,
}

impl RecordingModel {
    /// Number of `discover_registered_services` calls.
    pub fn discover_count(&self) -> usize {
        self.discovers.load(Ordering::SeqCst)
    }

    /// Number of `reset_services` calls.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl ServiceModel for RecordingModel {
    fn discover_registered_services(&self) {
        self.discovers.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_services(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Binder that hands out [`RecordingModel`]s and counts bindings.
#[derive(Debug, Default)]
pub struct RecordingBinder {
    models: Mutex<HashMap<DeviceId, Vec<Arc<RecordingModel>>>>,
}

impl RecordingBinder {
    /// Create an empty binder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of models bound for a device.
    pub fn bind_count(&self, id: &DeviceId) -> usize {
        lock(&self.models).get(id).map_or(0, Vec::len)
    }

    /// Total `discover_registered_services` calls across a device's models.
    pub fn discover_count(&self, id: &DeviceId) -> usize {
        self.sum(id, RecordingModel::discover_count)
    }

    /// Total `reset_services` calls across a device's models.
    pub fn reset_count(&self, id: &DeviceId) -> usize {
        self.sum(id, RecordingModel::reset_count)
    }

    fn sum(&self, id: &DeviceId, count: fn(&RecordingModel) -> usize) -> usize {
        lock(&self.models)
            .get(id)
            .map_or(0, |models| models.iter().map(|m| count(m.as_ref())).sum())
    }
}

impl<H> ServiceBinder<H> for RecordingBinder {
    fn bind(&self, id: &DeviceId, _handle: &H) -> Arc<dyn ServiceModel> {
        let model = Arc::new(RecordingModel::default());
        lock(&self.models)
            .entry(id.clone())
            .or_default()
            .push(Arc::clone(&model));
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_can_only_be_taken_once() {
        let adapter = MockAdapter::new();
        assert!(adapter.events().await.is_ok());
        assert!(matches!(
            adapter.events().await,
            Err(Error::AdapterEventsTaken)
        ));
    }

    #[tokio::test]
    async fn test_emitted_events_arrive_in_order() {
        let adapter = MockAdapter::new();
        let mut events = adapter.events().await.unwrap();
        let handle = MockHandle::new("AA:01", Some("Sensor"));

        adapter.power_on();
        adapter.discover(&handle, Some(-40));
        adapter.close_events();

        assert!(matches!(
            events.next().await,
            Some(AdapterEvent::PowerChanged(AdapterPower::PoweredOn))
        ));
        match events.next().await {
            Some(AdapterEvent::Discovered { name, rssi, .. }) => {
                assert_eq!(name.as_deref(), Some("Sensor"));
                assert_eq!(rssi, Some(-40));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_auto_respond_connect() {
        let adapter = MockAdapter::new();
        adapter.set_auto_respond(true);
        let handle = MockHandle::new("AA:01", None);

        adapter.connect(&handle, true).await.unwrap();
        assert_eq!(adapter.link_state(&handle).await, LinkState::Connected);
        assert_eq!(adapter.connect_count(&handle.id()), 1);

        adapter.cancel_connection(&handle).await.unwrap();
        assert_eq!(adapter.link_state(&handle).await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_reject_connect() {
        let adapter = MockAdapter::new();
        adapter.set_reject_connect(Some("radio busy"));
        let handle = MockHandle::new("AA:01", None);

        let err = adapter.connect(&handle, true).await.unwrap_err();
        assert!(err.to_string().contains("radio busy"));
        assert_eq!(adapter.link(&handle.id()), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_resolve_skips_unknown() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(MockHandle::new("AA:01", None));
        let handles = adapter
            .resolve_handles(&[DeviceId::new("ZZ"), DeviceId::new("AA:01")])
            .await
            .unwrap();
        assert_eq!(handles, vec![MockHandle::new("AA:01", None)]);
    }

    #[test]
    fn test_recording_binder_counts() {
        let binder = RecordingBinder::new();
        let id = DeviceId::new("AA:01");
        let model = ServiceBinder::<MockHandle>::bind(&binder, &id, &MockHandle::new("AA:01", None));
        model.discover_registered_services();
        model.reset_services();
        model.reset_services();

        assert_eq!(binder.bind_count(&id), 1);
        assert_eq!(binder.discover_count(&id), 1);
        assert_eq!(binder.reset_count(&id), 2);
        assert_eq!(binder.bind_count(&DeviceId::new("other")), 0);
    }
}
