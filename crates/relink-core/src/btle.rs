//! [`Adapter`] implementation for the host Bluetooth stack via btleplug.
//!
//! btleplug reports discoveries and disconnects on the central event stream,
//! but a connect is a plain future. Each connect therefore runs on its own
//! task and reports its outcome on a side channel that is merged into the
//! event stream handed to the manager.
//!
//! Identifiers are the Bluetooth address, or the platform peripheral id where
//! the address is hidden (macOS reports `00:00:00:00:00:00`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter,
};
use btleplug::platform::{Adapter as PlatformAdapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relink_types::{AdapterPower, Advertisement, DeviceId};

use crate::adapter::{Adapter, AdapterEvent, AdapterEventStream, LinkState, PeripheralHandle};
use crate::error::{Error, Result};

/// Default time allowed for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Format a peripheral id as a plain string.
///
/// btleplug only exposes the id through `Debug`, as `PeripheralId(...)`.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Pick the stable identifier for a peripheral: the address, unless the
/// platform hides it.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> DeviceId {
    if address == "00:00:00:00:00:00" {
        DeviceId::new(format_peripheral_id(peripheral_id))
    } else {
        DeviceId::new(address)
    }
}

/// Map btleplug's adapter state onto [`AdapterPower`].
pub fn map_central_state(state: CentralState) -> AdapterPower {
    match state {
        CentralState::PoweredOn => AdapterPower::PoweredOn,
        CentralState::PoweredOff => AdapterPower::PoweredOff,
        _ => AdapterPower::Unknown,
    }
}

/// Build an [`Advertisement`] from peripheral properties.
pub fn advertisement_from_properties(properties: &PeripheralProperties) -> Advertisement {
    Advertisement {
        local_name: properties.local_name.clone(),
        rssi: properties.rssi,
        tx_power_level: properties.tx_power_level,
        manufacturer_data: properties
            .manufacturer_data
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect(),
        service_data: properties
            .service_data
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect(),
        services: properties.services.clone(),
    }
}

/// Handle to a btleplug peripheral.
#[derive(Debug, Clone)]
pub struct BtleHandle {
    peripheral: Peripheral,
    id: DeviceId,
    name: Option<String>,
}

impl BtleHandle {
    /// Wrap a peripheral, reading its address and cached name.
    pub async fn from_peripheral(peripheral: Peripheral) -> Self {
        let properties = peripheral.properties().await.ok().flatten();
        let address = properties
            .as_ref()
            .map(|p| p.address.to_string())
            .unwrap_or_else(|| peripheral.address().to_string());
        Self {
            id: create_identifier(&address, &peripheral.id()),
            name: properties.and_then(|p| p.local_name),
            peripheral,
        }
    }

    /// The underlying btleplug peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

impl PeripheralHandle for BtleHandle {
    fn id(&self) -> DeviceId {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}

type EventSender = mpsc::UnboundedSender<AdapterEvent<BtleHandle>>;
type EventReceiver = mpsc::UnboundedReceiver<AdapterEvent<BtleHandle>>;

/// The host Bluetooth adapter.
pub struct BtleAdapter {
    adapter: PlatformAdapter,
    outcomes: EventSender,
    outcomes_rx: Mutex<Option<EventReceiver>>,
    allow_duplicates: Arc<AtomicBool>,
    pending: Arc<Mutex<HashMap<DeviceId, AbortHandle>>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for BtleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleAdapter")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl BtleAdapter {
    /// Wrap a btleplug adapter.
    pub fn new(adapter: PlatformAdapter) -> Self {
        let (outcomes, rx) = mpsc::unbounded_channel();
        Self {
            adapter,
            outcomes,
            outcomes_rx: Mutex::new(Some(rx)),
            allow_duplicates: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use the first adapter the host reports.
    pub async fn first() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }
        Ok(Self::new(adapter))
    }

    /// Set the time allowed for a single connect attempt.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn initial_events(&self) -> Vec<AdapterEvent<BtleHandle>> {
        let power = match self.adapter.adapter_state().await {
            Ok(state) => map_central_state(state),
            Err(e) => {
                debug!("Adapter state unavailable ({}); assuming powered on", e);
                AdapterPower::PoweredOn
            }
        };
        let mut events = vec![AdapterEvent::PowerChanged(power)];

        let mut restored = Vec::new();
        if let Ok(peripherals) = self.adapter.peripherals().await {
            for peripheral in peripherals {
                if peripheral.is_connected().await.unwrap_or(false) {
                    restored.push(BtleHandle::from_peripheral(peripheral).await);
                }
            }
        }
        if !restored.is_empty() {
            info!("{} peripherals already connected", restored.len());
            events.push(AdapterEvent::RestoreState { handles: restored });
        }
        events
    }
}

async fn translate(
    adapter: &PlatformAdapter,
    allow_duplicates: bool,
    event: CentralEvent,
) -> Option<AdapterEvent<BtleHandle>> {
    match event {
        CentralEvent::StateUpdate(state) => Some(AdapterEvent::PowerChanged(map_central_state(state))),
        CentralEvent::DeviceDiscovered(id) => discovered(adapter, &id).await,
        CentralEvent::DeviceUpdated(id) if allow_duplicates => discovered(adapter, &id).await,
        CentralEvent::DeviceDisconnected(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            Some(AdapterEvent::Disconnected {
                handle: BtleHandle::from_peripheral(peripheral).await,
                error: None,
            })
        }
        _ => None,
    }
}

async fn discovered(adapter: &PlatformAdapter, id: &PeripheralId) -> Option<AdapterEvent<BtleHandle>> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            debug!("Discovered peripheral vanished: {}", e);
            return None;
        }
    };
    let properties = peripheral.properties().await.ok().flatten()?;
    let advertisement = advertisement_from_properties(&properties);
    Some(AdapterEvent::Discovered {
        name: properties.local_name.clone(),
        rssi: properties.rssi,
        advertisement,
        handle: BtleHandle::from_peripheral(peripheral).await,
    })
}

#[async_trait]
impl Adapter for BtleAdapter {
    type Handle = BtleHandle;

    async fn start_scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> Result<()> {
        self.allow_duplicates.store(allow_duplicates, Ordering::Relaxed);
        self.adapter.start_scan(ScanFilter { services }).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, handle: &BtleHandle, _notify_on_disconnect: bool) -> Result<()> {
        let id = handle.id();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&id) {
            debug!(device = %id, "Connect already pending at the radio");
            return Ok(());
        }

        let handle = handle.clone();
        let outcomes = self.outcomes.clone();
        let registry = Arc::clone(&self.pending);
        let timeout = self.connect_timeout;
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, handle.peripheral.connect()).await;
            registry.lock().await.remove(&task_id);
            let event = match result {
                Ok(Ok(())) => AdapterEvent::ConnectCompleted { handle },
                Ok(Err(e)) => AdapterEvent::ConnectFailed {
                    handle,
                    error: e.to_string(),
                },
                Err(_) => AdapterEvent::ConnectFailed {
                    handle,
                    error: format!("connect timed out after {:?}", timeout),
                },
            };
            let _ = outcomes.send(event);
        });
        pending.insert(id, task.abort_handle());
        Ok(())
    }

    async fn cancel_connection(&self, handle: &BtleHandle) -> Result<()> {
        let id = handle.id();
        if let Some(task) = self.pending.lock().await.remove(&id) {
            task.abort();
        }

        if handle.peripheral.is_connected().await.unwrap_or(false) {
            // btleplug reports the teardown as DeviceDisconnected
            handle.peripheral.disconnect().await?;
        } else {
            let _ = self.outcomes.send(AdapterEvent::Disconnected {
                handle: handle.clone(),
                error: None,
            });
        }
        Ok(())
    }

    async fn resolve_handles(&self, ids: &[DeviceId]) -> Result<Vec<BtleHandle>> {
        let mut known = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            known.push(BtleHandle::from_peripheral(peripheral).await);
        }

        Ok(ids
            .iter()
            .filter_map(|id| {
                known
                    .iter()
                    .find(|h| h.id.as_str().eq_ignore_ascii_case(id.as_str()))
                    .cloned()
            })
            .collect())
    }

    async fn link_state(&self, handle: &BtleHandle) -> LinkState {
        if self.pending.lock().await.contains_key(&handle.id()) {
            return LinkState::Connecting;
        }
        match handle.peripheral.is_connected().await {
            Ok(true) => LinkState::Connected,
            Ok(false) => LinkState::Disconnected,
            Err(e) => {
                warn!(device = %handle.id(), "Failed to query link state: {}", e);
                LinkState::Disconnected
            }
        }
    }

    async fn events(&self) -> Result<AdapterEventStream<BtleHandle>> {
        let outcomes = self
            .outcomes_rx
            .lock()
            .await
            .take()
            .ok_or(Error::AdapterEventsTaken)?;

        let central = self.adapter.events().await?;
        let initial = self.initial_events().await;

        let adapter = self.adapter.clone();
        let allow_duplicates = Arc::clone(&self.allow_duplicates);
        let central = central
            .then(move |event| {
                let adapter = adapter.clone();
                let allow_duplicates = allow_duplicates.load(Ordering::Relaxed);
                async move { translate(&adapter, allow_duplicates, event).await }
            })
            .filter_map(|event| async move { event });

        let outcomes = futures::stream::unfold(outcomes, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(
            futures::stream::iter(initial).chain(futures::stream::select(central, outcomes)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_central_state() {
        assert_eq!(map_central_state(CentralState::PoweredOn), AdapterPower::PoweredOn);
        assert_eq!(map_central_state(CentralState::PoweredOff), AdapterPower::PoweredOff);
        assert_eq!(map_central_state(CentralState::Unknown), AdapterPower::Unknown);
    }

    #[test]
    fn test_advertisement_from_properties() {
        let service = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
        let properties = PeripheralProperties {
            local_name: Some("Sensor".to_string()),
            rssi: Some(-61),
            tx_power_level: Some(4),
            manufacturer_data: [(0x0702u16, vec![1, 2, 3])].into_iter().collect(),
            service_data: [(service, vec![9])].into_iter().collect(),
            services: vec![service],
            ..Default::default()
        };

        let adv = advertisement_from_properties(&properties);
        assert_eq!(adv.local_name.as_deref(), Some("Sensor"));
        assert_eq!(adv.rssi, Some(-61));
        assert_eq!(adv.tx_power_level, Some(4));
        assert_eq!(adv.manufacturer_data.get(&0x0702), Some(&vec![1, 2, 3]));
        assert!(adv.advertises_service(&service));
    }
}
