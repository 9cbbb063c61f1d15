//! The radio adapter seam.
//!
//! The connection manager never talks to a Bluetooth stack directly. It drives
//! an [`Adapter`] (scan, connect, cancel, resolve) and consumes the adapter's
//! asynchronous [`AdapterEvent`] stream. [`crate::btle::BtleAdapter`] implements
//! this for the host stack via btleplug; [`crate::mock::MockAdapter`]
//! implements it for tests.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use relink_types::{AdapterPower, Advertisement, DeviceId};

use crate::error::Result;

/// Adapter-level opaque reference to one physical peripheral.
///
/// Distinct from the manager's [`crate::Device`]: a handle is whatever the
/// radio stack needs to address the peripheral, and may be invalidated by an
/// adapter power cycle.
pub trait PeripheralHandle: Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable identifier of the peripheral behind this handle.
    fn id(&self) -> DeviceId;

    /// Name cached by the radio stack, if any.
    fn name(&self) -> Option<String>;
}

/// Radio-level link state of a peripheral, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No link and no pending connection.
    #[default]
    Disconnected,
    /// A connection request is pending at the radio.
    Connecting,
    /// The link is up.
    Connected,
    /// The link is being torn down.
    Disconnecting,
}

impl LinkState {
    /// Whether a link exists or is about to exist.
    pub fn is_active(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Connected)
    }
}

/// Events delivered by the adapter, in the order the radio stack produced them.
#[derive(Debug, Clone)]
pub enum AdapterEvent<H> {
    /// The adapter's power state changed.
    PowerChanged(AdapterPower),
    /// An advertisement was received while scanning.
    Discovered {
        /// Handle of the advertising peripheral.
        handle: H,
        /// Advertised name, if any.
        name: Option<String>,
        /// Signal strength in dBm, if the stack reported one.
        rssi: Option<i16>,
        /// Decoded advertisement payload.
        advertisement: Advertisement,
    },
    /// A connect request completed and the link is up.
    ConnectCompleted {
        /// Handle of the connected peripheral.
        handle: H,
    },
    /// A connect request failed.
    ConnectFailed {
        /// Handle of the peripheral.
        handle: H,
        /// Error description from the radio stack.
        error: String,
    },
    /// A link went down, either on request or because the link was lost.
    Disconnected {
        /// Handle of the peripheral.
        handle: H,
        /// Error description when the link was lost unexpectedly.
        error: Option<String>,
    },
    /// Peripherals the platform kept connected on the application's behalf
    /// across a process restart.
    RestoreState {
        /// Handles of the restored peripherals.
        handles: Vec<H>,
    },
}

impl<H: PeripheralHandle> AdapterEvent<H> {
    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterEvent::PowerChanged(_) => "power_changed",
            AdapterEvent::Discovered { .. } => "discovered",
            AdapterEvent::ConnectCompleted { .. } => "connect_completed",
            AdapterEvent::ConnectFailed { .. } => "connect_failed",
            AdapterEvent::Disconnected { .. } => "disconnected",
            AdapterEvent::RestoreState { .. } => "restore_state",
        }
    }

    /// Identifier of the peripheral the event is about, if it concerns one.
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            AdapterEvent::Discovered { handle, .. }
            | AdapterEvent::ConnectCompleted { handle }
            | AdapterEvent::ConnectFailed { handle, .. }
            | AdapterEvent::Disconnected { handle, .. } => Some(handle.id()),
            AdapterEvent::PowerChanged(_) | AdapterEvent::RestoreState { .. } => None,
        }
    }
}

/// Stream of adapter events.
pub type AdapterEventStream<H> = Pin<Box<dyn Stream<Item = AdapterEvent<H>> + Send>>;

/// Trait abstracting the radio stack operations the manager needs.
///
/// Operations that start radio activity (`connect`, `cancel_connection`)
/// return as soon as the request is accepted; their outcome arrives later as
/// an [`AdapterEvent`].
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Adapter-level peripheral reference.
    type Handle: PeripheralHandle;

    /// Start scanning, restricted to peripherals advertising one of
    /// `services` (empty = every advertisement).
    async fn start_scan(&self, services: Vec<Uuid>, allow_duplicates: bool) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Request a connection. Completion is reported as
    /// [`AdapterEvent::ConnectCompleted`] or [`AdapterEvent::ConnectFailed`].
    async fn connect(&self, handle: &Self::Handle, notify_on_disconnect: bool) -> Result<()>;

    /// Cancel a pending connection or tear down an established link.
    async fn cancel_connection(&self, handle: &Self::Handle) -> Result<()>;

    /// Look up handles for known identifiers. Identifiers the adapter does
    /// not know are skipped, so the result may be shorter than the input.
    async fn resolve_handles(&self, ids: &[DeviceId]) -> Result<Vec<Self::Handle>>;

    /// Current radio-level link state of a peripheral.
    async fn link_state(&self, handle: &Self::Handle) -> LinkState;

    /// Take the adapter's event stream. May only be called once.
    async fn events(&self) -> Result<AdapterEventStream<Self::Handle>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHandle;

    #[test]
    fn test_link_state_active() {
        assert!(LinkState::Connected.is_active());
        assert!(LinkState::Connecting.is_active());
        assert!(!LinkState::Disconnected.is_active());
        assert!(!LinkState::Disconnecting.is_active());
    }

    #[test]
    fn test_event_kind_and_id() {
        let handle = MockHandle::new("AA:01", Some("Sensor"));
        let event = AdapterEvent::ConnectFailed {
            handle: handle.clone(),
            error: "timeout".to_string(),
        };
        assert_eq!(event.kind(), "connect_failed");
        assert_eq!(event.device_id(), Some(DeviceId::new("AA:01")));

        let power: AdapterEvent<MockHandle> = AdapterEvent::PowerChanged(AdapterPower::PoweredOn);
        assert_eq!(power.kind(), "power_changed");
        assert_eq!(power.device_id(), None);
    }
}
