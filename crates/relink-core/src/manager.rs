//! The connection manager state machine.
//!
//! One [`ConnectionManager`] runs per adapter, on its own Tokio task. It owns
//! the [`DeviceRegistry`], talks to the [`Adapter`] and the
//! [`IdentityStore`], and emits [`Notification`]s. Everything else reaches it
//! through a [`ManagerHandle`], whose commands are queued onto the same task
//! as adapter events so no two state mutations ever overlap.
//!
//! # Example
//!
//! ```no_run
//! use relink_core::{BtleAdapter, ManagerBuilder, NameFilter};
//!
//! # async fn example() -> relink_core::Result<()> {
//! let adapter = BtleAdapter::first().await?;
//! let (manager, worker) = ManagerBuilder::new(adapter)
//!     .admission(NameFilter::new("thermo"))
//!     .spawn()
//!     .await?;
//!
//! let mut notifications = manager.subscribe();
//! manager.scan(Vec::new(), false).await?;
//! while let Ok(notification) = notifications.recv().await {
//!     println!("{:?}", notification);
//! }
//!
//! manager.shutdown().await?;
//! let _ = worker.await;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use relink_types::{AdapterPower, Advertisement, DeviceId};

use crate::adapter::{Adapter, AdapterEvent, LinkState, PeripheralHandle};
use crate::admission::{AcceptAll, AdmissionPolicy};
use crate::config::ManagerConfig;
use crate::device::{Device, DeviceInfo};
use crate::error::{Error, Result};
use crate::events::{
    ConnectionDelegate, DisconnectReason, Notification, NotificationChannel, NotificationReceiver,
};
use crate::identity::{IdentityStore, MemoryIdentityStore};
use crate::registry::DeviceRegistry;
use crate::retry::MIN_REJECTION_RETRY_DELAY;
use crate::router::{EventRouter, Inbound};
use crate::service::{NoopServiceBinder, ServiceBinder, ServiceModel};

/// Messages processed by the manager worker.
enum Command {
    Scan {
        services: Vec<Uuid>,
        allow_duplicates: bool,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Connect {
        id: DeviceId,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        id: DeviceId,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    /// Posted by the worker to itself after a failed connect.
    Retry { id: DeviceId },
}

/// Point-in-time view of the manager state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Last reported adapter power state.
    pub power: AdapterPower,
    /// Whether the adapter is scanning on the manager's behalf.
    pub scanning: bool,
    /// Devices discovered since the current scan started.
    pub discovered: Vec<DeviceInfo>,
    /// Devices with an initiated connect.
    pub connecting: Vec<DeviceInfo>,
    /// Devices with a completed connection.
    pub connected: Vec<DeviceInfo>,
    /// Restored devices waiting for power-on.
    pub pending_restore: Vec<DeviceInfo>,
    /// Durable reconnect identities.
    pub persisted: Vec<DeviceId>,
}

impl ManagerSnapshot {
    /// Whether a device with this identifier is connected.
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.connected.iter().any(|d| &d.id == id)
    }

    /// Whether a device with this identifier has an initiated connect.
    pub fn is_connecting(&self, id: &DeviceId) -> bool {
        self.connecting.iter().any(|d| &d.id == id)
    }
}

#[derive(Debug, Clone)]
struct ScanRequest {
    services: Vec<Uuid>,
    allow_duplicates: bool,
}

/// Cloneable command surface of a running manager.
///
/// Every command is queued onto the manager's worker and resolves once the
/// worker has processed it. The only error is [`Error::ManagerShutdown`].
/// Dropping every handle stops the worker.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Scan { services, .. } => write!(f, "Scan({} services)", services.len()),
            Command::Stop { .. } => f.write_str("Stop"),
            Command::Connect { id, .. } => write!(f, "Connect({})", id),
            Command::Disconnect { id, .. } => write!(f, "Disconnect({})", id),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
            Command::Retry { id } => write!(f, "Retry({})", id),
        }
    }
}

impl ManagerHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| Error::ManagerShutdown)?;
        rx.await.map_err(|_| Error::ManagerShutdown)
    }

    /// Start scanning for peripherals advertising one of `services` (empty =
    /// every advertisement). Deferred until power-on if the adapter is off.
    pub async fn scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> Result<()> {
        self.request(|reply| Command::Scan {
            services,
            allow_duplicates,
            reply,
        })
        .await
    }

    /// Stop scanning. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Connect to a device and remember it for automatic reconnection.
    pub async fn connect(&self, id: impl Into<DeviceId>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Connect { id, reply }).await
    }

    /// Disconnect from a device and forget its reconnect identity.
    pub async fn disconnect(&self, id: impl Into<DeviceId>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Disconnect { id, reply }).await
    }

    /// Snapshot of the manager state after every previously queued event.
    pub async fn snapshot(&self) -> Result<ManagerSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop scanning, cancel pending retries and stop the worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Subscribe to notifications emitted after this call.
    pub fn subscribe(&self) -> NotificationReceiver {
        self.notifications.subscribe()
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Builder for a [`ConnectionManager`].
pub struct ManagerBuilder<A: Adapter> {
    adapter: A,
    config: ManagerConfig,
    identities: Arc<dyn IdentityStore>,
    admission: Arc<dyn AdmissionPolicy>,
    binder: Arc<dyn ServiceBinder<A::Handle>>,
    delegate: Option<Arc<dyn ConnectionDelegate>>,
}

impl<A: Adapter> ManagerBuilder<A> {
    /// Start building a manager for `adapter`.
    ///
    /// Defaults: [`ManagerConfig::default`], a process-local identity store,
    /// [`AcceptAll`] admission, no service models and no delegate.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            config: ManagerConfig::default(),
            identities: Arc::new(MemoryIdentityStore::new()),
            admission: Arc::new(AcceptAll),
            binder: Arc::new(NoopServiceBinder),
            delegate: None,
        }
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the durable identity store.
    #[must_use]
    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identities = store;
        self
    }

    /// Set the admission hook.
    #[must_use]
    pub fn admission(mut self, policy: impl AdmissionPolicy + 'static) -> Self {
        self.admission = Arc::new(policy);
        self
    }

    /// Set the service-model binder.
    #[must_use]
    pub fn service_binder(mut self, binder: Arc<dyn ServiceBinder<A::Handle>>) -> Self {
        self.binder = binder;
        self
    }

    /// Set the notification delegate.
    #[must_use]
    pub fn delegate(mut self, delegate: Arc<dyn ConnectionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Validate the configuration, take the adapter's event stream and start
    /// the worker.
    ///
    /// The returned join handle completes after the worker has stopped and
    /// every notification has been delivered.
    pub async fn spawn(self) -> Result<(ManagerHandle, JoinHandle<()>)> {
        self.config.validate()?;
        let events = self.adapter.events().await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (loopback_tx, loopback_rx) = mpsc::unbounded_channel();
        let notifications =
            NotificationChannel::spawn(self.delegate, self.config.notification_capacity);
        let handle = ManagerHandle {
            commands: command_tx,
            notifications: notifications.broadcaster(),
        };

        let manager = ConnectionManager {
            adapter: self.adapter,
            config: self.config,
            identities: self.identities,
            admission: self.admission,
            binder: self.binder,
            notifications,
            registry: DeviceRegistry::new(),
            power: AdapterPower::Unknown,
            scanning: false,
            scan_request: None,
            inflight: HashSet::new(),
            disconnecting: HashMap::new(),
            reconnect_after_teardown: HashSet::new(),
            attempts: HashMap::new(),
            bindings: HashMap::new(),
            loopback: loopback_tx,
            cancel: CancellationToken::new(),
        };
        let router = EventRouter::new(events, loopback_rx, command_rx);
        let worker = tokio::spawn(manager.run(router));

        info!("Connection manager started");
        Ok((handle, worker))
    }
}

/// The state machine. Created by [`ManagerBuilder::spawn`] and driven by its
/// worker task; not reachable directly.
pub struct ConnectionManager<A: Adapter> {
    adapter: A,
    config: ManagerConfig,
    identities: Arc<dyn IdentityStore>,
    admission: Arc<dyn AdmissionPolicy>,
    binder: Arc<dyn ServiceBinder<A::Handle>>,
    notifications: NotificationChannel,
    registry: DeviceRegistry<A::Handle>,
    power: AdapterPower,
    scanning: bool,
    /// Scan the application wants, active or waiting for power-on.
    scan_request: Option<ScanRequest>,
    /// Identifiers with an issued radio connect that has not resolved.
    inflight: HashSet<DeviceId>,
    /// User-requested teardowns in progress.
    disconnecting: HashMap<DeviceId, Device<A::Handle>>,
    /// Connects requested while a teardown was in progress.
    reconnect_after_teardown: HashSet<DeviceId>,
    /// Connect attempts in the current cycle.
    attempts: HashMap<DeviceId, u32>,
    /// Service models by identifier, dropped when the application
    /// disconnects the device.
    bindings: HashMap<DeviceId, Arc<dyn ServiceModel>>,
    loopback: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl<A: Adapter> ConnectionManager<A> {
    async fn run(mut self, mut router: EventRouter<A::Handle, Command>) {
        while let Some(inbound) = router.next().await {
            match inbound {
                Inbound::Adapter(event) => self.handle_adapter_event(event).await,
                Inbound::Command(command) => {
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
        let Self { notifications, .. } = self;
        notifications.close().await;
        info!("Connection manager stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        trace!("Command: {:?}", command);
        match command {
            Command::Scan {
                services,
                allow_duplicates,
                reply,
            } => {
                self.scan(ScanRequest {
                    services,
                    allow_duplicates,
                })
                .await;
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Connect { id, reply } => {
                self.connect_by_id(id).await;
                let _ = reply.send(());
            }
            Command::Disconnect { id, reply } => {
                self.disconnect(id).await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Retry { id } => self.on_retry(id).await,
            Command::Shutdown { reply } => {
                self.stop().await;
                self.cancel.cancel();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_adapter_event(&mut self, event: AdapterEvent<A::Handle>) {
        trace!(kind = event.kind(), device = ?event.device_id(), "Adapter event");
        match event {
            AdapterEvent::PowerChanged(state) => self.on_power_changed(state).await,
            AdapterEvent::Discovered {
                handle,
                name,
                rssi,
                advertisement,
            } => self.on_discovered(handle, name, rssi, advertisement).await,
            AdapterEvent::ConnectCompleted { handle } => self.on_connect_completed(handle).await,
            AdapterEvent::ConnectFailed { handle, error } => {
                self.on_connect_failed(handle, error).await
            }
            AdapterEvent::Disconnected { handle, error } => {
                self.on_disconnected(handle, error).await
            }
            AdapterEvent::RestoreState { handles } => self.on_restore_state(handles).await,
        }
    }

    fn notify(&self, notification: Notification) {
        self.notifications.send(notification);
    }

    /// Carry over the service model already attached to this peripheral,
    /// if any. Every device the manager hands to the registry goes through
    /// here first.
    fn track(&self, mut device: Device<A::Handle>) -> Device<A::Handle> {
        if let Some(existing) = self.registry.find(device.id()) {
            device.adopt_binding(existing);
        }
        if let Some(model) = self.bindings.get(device.id()) {
            device.attach_service_model(model.clone());
        }
        device
    }

    /// Like [`track`](Self::track), creating the service model on the
    /// device's first connect.
    fn bind(&mut self, device: Device<A::Handle>) -> Device<A::Handle> {
        let mut device = self.track(device);
        device.bind_service_model(self.binder.as_ref());
        if let Some(model) = device.service_model() {
            self.bindings.entry(device.id().clone()).or_insert(model);
        }
        device
    }

    fn persist(&self, id: &DeviceId) {
        if let Err(e) = self.identities.add_identity(id) {
            warn!("Failed to persist reconnect identity {}: {}", id, e);
        }
    }

    fn forget(&self, id: &DeviceId) {
        if let Err(e) = self.identities.remove_identity(id) {
            warn!("Failed to remove reconnect identity {}: {}", id, e);
        }
    }

    // ==================== Scanning ====================

    async fn scan(&mut self, request: ScanRequest) {
        if self.scanning && !self.config.allow_rescan {
            debug!("Already scanning; rescan not allowed");
            return;
        }

        self.registry.clear_discovered();
        self.scan_request = Some(request.clone());

        if !self.power.is_powered_on() {
            info!("Adapter is {}; scan deferred until power-on", self.power);
            return;
        }
        self.start_scan(request).await;
    }

    async fn start_scan(&mut self, request: ScanRequest) {
        match self
            .adapter
            .start_scan(request.services.clone(), request.allow_duplicates)
            .await
        {
            Ok(()) => {
                self.scanning = true;
                info!(
                    services = request.services.len(),
                    allow_duplicates = request.allow_duplicates,
                    "Scan started"
                );
            }
            Err(e) => {
                self.scanning = false;
                warn!("Failed to start scan: {}", e);
            }
        }
    }

    async fn stop(&mut self) {
        self.scan_request = None;
        if !self.scanning {
            return;
        }
        self.scanning = false;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        info!("Scan stopped");
    }

    async fn stop_scan_for_connect(&mut self) {
        if self.scanning && self.config.stop_scan_when_connecting {
            debug!("Stopping scan before connecting");
            self.stop().await;
        }
    }

    async fn on_discovered(
        &mut self,
        handle: A::Handle,
        name: Option<String>,
        rssi: Option<i16>,
        advertisement: Advertisement,
    ) {
        if !self.scanning {
            trace!("Discovery while not scanning ignored");
            return;
        }

        let device = self.track(Device::with_name(handle.clone(), name.clone()));
        let id = device.id().clone();
        if !self.registry.register(device.clone())
            && let Some(existing) = self.registry.find_mut(&id)
        {
            existing.refresh_name(name);
            if !self.inflight.contains(&id) {
                existing.refresh_handle(handle);
            }
        }
        let info = self
            .registry
            .find(&id)
            .map(Device::info)
            .unwrap_or_else(|| device.info());

        self.notify(Notification::Discovered {
            device: info.clone(),
            rssi,
            advertisement: advertisement.clone(),
        });

        if self.registry.is_connected(&id)
            || self.registry.is_connecting(&id)
            || self.disconnecting.contains_key(&id)
        {
            trace!(device = %id, "Already tracked; not re-admitted");
            return;
        }
        if !self.config.passes_rssi_floor(rssi) {
            debug!(device = %id, rssi = ?rssi, "Below signal-strength floor; not connecting");
            return;
        }
        if !self
            .admission
            .should_connect_to(&info, Some(&advertisement))
        {
            debug!(device = %id, "Admission rejected");
            return;
        }

        let device = self.registry.find(&id).cloned().unwrap_or(device);
        self.connect(device).await;
    }

    // ==================== Connecting ====================

    async fn connect_by_id(&mut self, id: DeviceId) {
        if let Some(device) = self.registry.find(&id).cloned() {
            self.connect(device).await;
            return;
        }
        if let Some(device) = self.disconnecting.get(&id).cloned() {
            self.connect(device).await;
            return;
        }

        if self.power.is_powered_on() {
            match self.adapter.resolve_handles(std::slice::from_ref(&id)).await {
                Ok(handles) => {
                    if let Some(handle) = handles.into_iter().find(|h| h.id() == id) {
                        let device = self.track(Device::from_handle(handle));
                        self.connect(device).await;
                        return;
                    }
                    info!(device = %id, "Unknown to the adapter; will connect when it resolves");
                }
                Err(e) => warn!("Failed to resolve {}: {}", id, e),
            }
        } else {
            info!(device = %id, "Adapter is {}; will connect on power-on", self.power);
        }
        self.persist(&id);
    }

    /// Start a connect cycle for a device.
    async fn connect(&mut self, device: Device<A::Handle>) {
        let id = device.id().clone();

        if self.inflight.contains(&id) {
            debug!(device = %id, "Connect already in flight");
            return;
        }
        if self.disconnecting.contains_key(&id) {
            debug!(device = %id, "Teardown in progress; reconnecting afterwards");
            self.persist(&id);
            self.reconnect_after_teardown.insert(id);
            return;
        }
        if self.registry.is_connected(&id)
            && self.adapter.link_state(device.handle()).await == LinkState::Connected
        {
            debug!(device = %id, "Already connected");
            return;
        }

        let device = self.bind(device);
        self.persist(&id);
        self.stop_scan_for_connect().await;
        self.registry.mark_connecting(device.clone());
        self.attempts.remove(&id);

        if !self.power.is_powered_on() {
            info!(device = %id, "Adapter is {}; connect deferred until power-on", self.power);
            return;
        }
        self.notify(Notification::WillConnect {
            device: device.info(),
        });
        self.issue_connect(device).await;
    }

    /// Issue the radio-level connect for one attempt.
    async fn issue_connect(&mut self, device: Device<A::Handle>) {
        let id = device.id().clone();
        let attempt = {
            let attempts = self.attempts.entry(id.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        self.inflight.insert(id.clone());
        debug!(device = %id, attempt, "Issuing connect");

        if let Err(e) = self.adapter.connect(device.handle(), true).await {
            self.inflight.remove(&id);
            warn!(device = %id, "Adapter rejected connect: {}", e);
            self.connect_failed(device, e.to_string(), true);
        }
    }

    async fn on_retry(&mut self, id: DeviceId) {
        if !self.power.is_powered_on() {
            trace!(device = %id, "Retry while unpowered dropped");
            return;
        }
        if !self.registry.is_connecting(&id) || self.inflight.contains(&id) {
            trace!(device = %id, "Retry no longer needed");
            return;
        }
        let Some(device) = self.registry.find(&id).cloned() else {
            return;
        };
        self.notify(Notification::WillConnect {
            device: device.info(),
        });
        self.issue_connect(device).await;
    }

    async fn on_connect_completed(&mut self, handle: A::Handle) {
        let id = handle.id();
        self.inflight.remove(&id);

        if let Some(device) = self.disconnecting.get_mut(&id) {
            debug!(device = %id, "Connected after disconnect was requested; cancelling");
            device.refresh_handle(handle.clone());
            if let Err(e) = self.adapter.cancel_connection(&handle).await {
                warn!(device = %id, "Failed to cancel connection: {}", e);
                if let Some(device) = self.disconnecting.remove(&id) {
                    self.finish_user_disconnect(device, false).await;
                }
            }
            return;
        }

        let mut device = match self.registry.find(&id) {
            Some(device) => device.clone(),
            None => {
                debug!(device = %id, "Connect completed for an untracked device");
                Device::from_handle(handle.clone())
            }
        };
        device.refresh_handle(handle);
        let device = self.bind(device);

        self.attempts.remove(&id);
        self.registry.promote_to_connected(device.clone());
        info!(device = %id, "Connected");
        self.notify(Notification::Connected {
            device: device.info(),
        });
        device.discover_services();
    }

    async fn on_connect_failed(&mut self, handle: A::Handle, error: String) {
        let id = handle.id();
        let was_inflight = self.inflight.remove(&id);

        if let Some(device) = self.disconnecting.remove(&id) {
            debug!(device = %id, "Connect failed during teardown");
            self.finish_user_disconnect(device, false).await;
            return;
        }
        if !was_inflight && !self.registry.is_connecting(&id) {
            debug!(device = %id, "Connect failure for an untracked device ignored: {}", error);
            return;
        }

        let device = match self.registry.find(&id).cloned() {
            Some(device) => device,
            None => self.track(Device::from_handle(handle)),
        };
        warn!(device = %id, "Connect failed: {}", error);
        self.connect_failed(device, error, false);
    }

    /// Report a failed attempt and schedule the next one, or give up.
    fn connect_failed(&mut self, device: Device<A::Handle>, error: String, rejected: bool) {
        let id = device.id().clone();
        let attempt = self.attempts.get(&id).copied().unwrap_or(1);
        let powered = self.power.is_powered_on();
        let will_retry = powered && self.config.retry.allows_attempt(attempt.saturating_add(1));

        self.notify(Notification::ConnectFailed {
            device: device.info(),
            error,
            attempt,
            will_retry,
        });

        if will_retry {
            let mut delay = self.config.retry.delay_for_attempt(attempt - 1);
            if rejected {
                delay = delay.max(MIN_REJECTION_RETRY_DELAY);
            }
            self.schedule_retry(id, delay);
        } else if powered {
            info!(device = %id, attempts = attempt, "Giving up; identity kept for next power-on");
            self.registry.remove_connecting(&id);
            self.attempts.remove(&id);
        }
    }

    fn schedule_retry(&self, id: DeviceId, delay: std::time::Duration) {
        debug!(device = %id, delay = ?delay, "Scheduling connect retry");
        if delay.is_zero() {
            let _ = self.loopback.send(Command::Retry { id });
            return;
        }

        let loopback = self.loopback.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = loopback.send(Command::Retry { id });
                }
            }
        });
    }

    // ==================== Disconnecting ====================

    async fn disconnect(&mut self, id: DeviceId) {
        self.forget(&id);
        self.reconnect_after_teardown.remove(&id);
        self.attempts.remove(&id);

        if self.disconnecting.contains_key(&id) {
            debug!(device = %id, "Disconnect already in progress");
            return;
        }
        let Some(device) = self.registry.find(&id).cloned() else {
            debug!(device = %id, "Disconnect for an untracked device; identity forgotten");
            return;
        };

        let was_inflight = self.inflight.remove(&id);
        let was_connected = self.registry.remove_connected(&id).is_some();
        self.registry.remove_connecting(&id);

        let link = if self.power.is_powered_on() {
            self.adapter.link_state(device.handle()).await
        } else {
            LinkState::Disconnected
        };

        if self.power.is_powered_on() && (link.is_active() || was_inflight) {
            info!(device = %id, "Disconnecting");
            self.disconnecting.insert(id.clone(), device.clone());
            if let Err(e) = self.adapter.cancel_connection(device.handle()).await {
                warn!(device = %id, "Failed to cancel connection: {}", e);
                self.disconnecting.remove(&id);
                self.finish_user_disconnect(device, was_connected).await;
            }
        } else {
            debug!(device = %id, link = ?link, "Link already down; local disconnect");
            // Power loss already reset the services of connected devices
            let reset = was_connected && self.power.is_powered_on();
            self.finish_user_disconnect(device, reset).await;
        }
    }

    /// Complete a user-requested teardown.
    async fn finish_user_disconnect(&mut self, device: Device<A::Handle>, reset: bool) {
        let id = device.id().clone();
        if reset {
            device.reset_services();
        }
        self.registry.remove(&id);
        self.attempts.remove(&id);
        self.bindings.remove(&id);
        info!(device = %id, "Disconnected on request");
        self.notify(Notification::Disconnected {
            device: device.info(),
            retry: false,
            reason: DisconnectReason::UserRequested,
        });

        if self.reconnect_after_teardown.remove(&id) {
            self.connect(device).await;
        }
    }

    async fn on_disconnected(&mut self, handle: A::Handle, error: Option<String>) {
        let id = handle.id();
        if !self.power.is_powered_on() {
            trace!(device = %id, "Disconnect while unpowered ignored");
            return;
        }
        let was_inflight = self.inflight.remove(&id);

        if let Some(device) = self.disconnecting.remove(&id) {
            self.finish_user_disconnect(device, true).await;
            return;
        }

        if !self.registry.is_connected(&id) {
            // The link never came up: a failed attempt, not a disconnect
            if was_inflight && let Some(device) = self.registry.find(&id).cloned() {
                let error = error.unwrap_or_else(|| "link lost while connecting".to_string());
                warn!(device = %id, "Connect failed: {}", error);
                self.connect_failed(device, error, false);
            } else {
                trace!(device = %id, "Disconnect for an untracked device ignored");
            }
            return;
        }
        let Some(device) = self.registry.find(&id).cloned() else {
            return;
        };

        device.reset_services();
        self.registry.remove_connected(&id);
        let retry = self.config.should_connect_after_disconnect;
        let reason = match error {
            Some(error) => DisconnectReason::BleError(error),
            None => DisconnectReason::LinkLost,
        };
        info!(device = %id, retry, reason = ?reason, "Link lost");
        self.notify(Notification::Disconnected {
            device: device.info(),
            retry,
            reason,
        });

        if retry {
            self.connect(device).await;
        } else {
            self.registry.remove_connecting(&id);
        }
    }

    // ==================== Power and restoration ====================

    async fn on_power_changed(&mut self, state: AdapterPower) {
        let previous = self.power;
        if previous == state {
            trace!("Power state unchanged ({})", state);
            return;
        }
        self.power = state;
        info!("Adapter power {} -> {}", previous, state);
        self.notify(Notification::PowerChanged { state });

        if previous.is_powered_on() {
            self.on_power_lost();
        }
        if state.is_powered_on() {
            self.on_powered_on().await;
        } else if state.is_unavailable() {
            warn!("Bluetooth is {}; no radio operations possible", state);
        }
    }

    fn on_power_lost(&mut self) {
        self.scanning = false;
        self.inflight.clear();

        let connected: Vec<_> = self.registry.connected().cloned().collect();
        for device in connected {
            device.reset_services();
            self.notify(Notification::Disconnected {
                device: device.info(),
                retry: false,
                reason: DisconnectReason::AdapterPoweredOff,
            });
        }

        let teardowns: Vec<_> = self.disconnecting.drain().collect();
        for (id, device) in teardowns {
            device.reset_services();
            self.registry.remove(&id);
            self.notify(Notification::Disconnected {
                device: device.info(),
                retry: false,
                reason: DisconnectReason::UserRequested,
            });
            if self.reconnect_after_teardown.remove(&id) {
                self.registry.mark_connecting(device);
            }
        }
    }

    async fn on_powered_on(&mut self) {
        let mut covered = HashSet::new();

        // (a) restore-state handles
        self.connect_pending_restore(&mut covered).await;

        // (b) devices from before the power cycle
        let prior: Vec<_> = self
            .registry
            .connected()
            .chain(self.registry.connecting())
            .filter(|d| !covered.contains(d.id()))
            .cloned()
            .collect();
        for device in prior {
            covered.insert(device.id().clone());
            self.registry.remove_connected(device.id());
            self.connect(device).await;
        }

        // (c) persisted identities
        let persisted = match self.identities.list_identities() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to read reconnect identities: {}", e);
                Vec::new()
            }
        };
        let missing: Vec<_> = persisted
            .into_iter()
            .filter(|id| !covered.contains(id))
            .collect();
        if !missing.is_empty() {
            debug!("Resolving {} persisted identities", missing.len());
            match self.adapter.resolve_handles(&missing).await {
                Ok(handles) => {
                    for handle in handles {
                        if covered.insert(handle.id()) {
                            let device = self.track(Device::from_handle(handle));
                            self.connect(device).await;
                        }
                    }
                }
                Err(e) => warn!("Failed to resolve persisted identities: {}", e),
            }
        }

        if !self.scanning
            && let Some(request) = self.scan_request.clone()
        {
            info!("Resuming scan after power-on");
            self.start_scan(request).await;
        }
    }

    async fn connect_pending_restore(&mut self, covered: &mut HashSet<DeviceId>) {
        for device in self.registry.take_pending_restore() {
            covered.insert(device.id().clone());
            self.connect(device).await;
        }
    }

    async fn on_restore_state(&mut self, handles: Vec<A::Handle>) {
        info!("Restoring {} peripherals", handles.len());
        for handle in handles {
            let device = self.track(Device::from_handle(handle));
            if !self.admission.should_connect_to(&device.info(), None) {
                debug!(device = %device.id(), "Admission rejected restored device");
                continue;
            }
            self.registry.add_pending_restore(device);
        }

        if self.power.is_powered_on() {
            self.connect_pending_restore(&mut HashSet::new()).await;
        }
    }

    fn snapshot(&self) -> ManagerSnapshot {
        let persisted = self.identities.list_identities().unwrap_or_else(|e| {
            warn!("Failed to read reconnect identities: {}", e);
            Vec::new()
        });
        ManagerSnapshot {
            power: self.power,
            scanning: self.scanning,
            discovered: self.registry.discovered().map(Device::info).collect(),
            connecting: self.registry.connecting().map(Device::info).collect(),
            connected: self.registry.connected().map(Device::info).collect(),
            pending_restore: self.registry.pending_restore().map(Device::info).collect(),
            persisted,
        }
    }
}

impl<A: Adapter> std::fmt::Debug for ConnectionManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("power", &self.power)
            .field("scanning", &self.scanning)
            .field("connected", &self.registry.connected_count())
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}
