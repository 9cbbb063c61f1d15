//! Lifecycle notifications and their delivery.
//!
//! The manager emits one [`Notification`] per state transition. They are
//! queued on an unbounded channel and delivered by a single task, first to
//! the application's [`ConnectionDelegate`] (if any) and then to every
//! broadcast subscriber. Delivery is serialized and in emission order, and
//! never runs on the manager's worker, so a slow delegate cannot stall the
//! state machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relink_types::{AdapterPower, Advertisement};

use crate::device::DeviceInfo;

/// Lifecycle events delivered to the application.
///
/// All notifications are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Notification {
    /// An advertisement was received while scanning.
    Discovered {
        device: DeviceInfo,
        rssi: Option<i16>,
        advertisement: Advertisement,
    },
    /// A radio-level connect is about to be issued.
    WillConnect { device: DeviceInfo },
    /// A connection completed.
    Connected { device: DeviceInfo },
    /// A connection ended. `retry` tells whether the manager reconnects on
    /// its own.
    Disconnected {
        device: DeviceInfo,
        retry: bool,
        reason: DisconnectReason,
    },
    /// A connect attempt failed.
    ConnectFailed {
        device: DeviceInfo,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    /// The adapter's power state changed.
    PowerChanged { state: AdapterPower },
}

impl Notification {
    /// Short name of the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Discovered { .. } => "discovered",
            Notification::WillConnect { .. } => "will_connect",
            Notification::Connected { .. } => "connected",
            Notification::Disconnected { .. } => "disconnected",
            Notification::ConnectFailed { .. } => "connect_failed",
            Notification::PowerChanged { .. } => "power_changed",
        }
    }

    /// The device the notification is about, if any.
    pub fn device(&self) -> Option<&DeviceInfo> {
        match self {
            Notification::Discovered { device, .. }
            | Notification::WillConnect { device }
            | Notification::Connected { device }
            | Notification::Disconnected { device, .. }
            | Notification::ConnectFailed { device, .. } => Some(device),
            Notification::PowerChanged { .. } => None,
        }
    }
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The application asked for the disconnect.
    UserRequested,
    /// The link dropped without an error report.
    LinkLost,
    /// The local adapter stopped being powered on.
    AdapterPoweredOff,
    /// The radio stack reported an error.
    BleError(String),
}

/// Observer for lifecycle notifications.
///
/// Every method is required. Methods are called one at a time, in emission
/// order, from the notification task.
pub trait ConnectionDelegate: Send + Sync + 'static {
    /// An advertisement was received.
    fn did_discover(&self, device: &DeviceInfo, rssi: Option<i16>, advertisement: &Advertisement);

    /// A connect is about to be issued.
    fn will_connect(&self, device: &DeviceInfo);

    /// A connection completed.
    fn did_connect(&self, device: &DeviceInfo);

    /// A connection ended.
    fn did_disconnect(&self, device: &DeviceInfo, retry: bool, reason: &DisconnectReason);

    /// A connect attempt failed.
    fn did_fail_to_connect(&self, device: &DeviceInfo, error: &str, attempt: u32, will_retry: bool);

    /// The adapter's power state changed.
    fn power_state_changed(&self, state: AdapterPower);
}

/// Call the delegate method matching a notification.
pub fn dispatch(delegate: &dyn ConnectionDelegate, notification: &Notification) {
    match notification {
        Notification::Discovered {
            device,
            rssi,
            advertisement,
        } => delegate.did_discover(device, *rssi, advertisement),
        Notification::WillConnect { device } => delegate.will_connect(device),
        Notification::Connected { device } => delegate.did_connect(device),
        Notification::Disconnected {
            device,
            retry,
            reason,
        } => delegate.did_disconnect(device, *retry, reason),
        Notification::ConnectFailed {
            device,
            error,
            attempt,
            will_retry,
        } => delegate.did_fail_to_connect(device, error, *attempt, *will_retry),
        Notification::PowerChanged { state } => delegate.power_state_changed(*state),
    }
}

/// Receiver for notifications.
pub type NotificationReceiver = broadcast::Receiver<Notification>;

/// Serialized notification delivery.
///
/// Dropping the channel (or calling [`NotificationChannel::close`]) lets the
/// delivery task drain what is queued and exit.
#[derive(Debug)]
pub struct NotificationChannel {
    queue: mpsc::UnboundedSender<Notification>,
    broadcast: broadcast::Sender<Notification>,
    task: JoinHandle<()>,
}

impl NotificationChannel {
    /// Start the delivery task. Must be called within a Tokio runtime.
    pub fn spawn(delegate: Option<Arc<dyn ConnectionDelegate>>, capacity: usize) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Notification>();
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        let subscribers = broadcast.clone();

        let task = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Some(delegate) = &delegate {
                    dispatch(delegate.as_ref(), &notification);
                }
                // No subscribers is fine
                let _ = subscribers.send(notification);
            }
            debug!("Notification queue closed");
        });

        Self {
            queue,
            broadcast,
            task,
        }
    }

    /// Queue a notification for delivery.
    pub fn send(&self, notification: Notification) {
        if self.queue.send(notification).is_err() {
            warn!("Notification task has stopped; dropping notification");
        }
    }

    /// Subscribe to notifications sent after this call.
    pub fn subscribe(&self) -> NotificationReceiver {
        self.broadcast.subscribe()
    }

    /// Sender side of the broadcast, for handing out subscriptions elsewhere.
    pub fn broadcaster(&self) -> broadcast::Sender<Notification> {
        self.broadcast.clone()
    }

    /// Stop accepting notifications and wait until every queued one has been
    /// delivered.
    pub async fn close(self) {
        let Self { queue, task, .. } = self;
        drop(queue);
        if let Err(e) = task.await {
            warn!("Notification task ended abnormally: {}", e);
        }
    }
}

/// Delegate that logs every notification through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDelegate;

impl ConnectionDelegate for LoggingDelegate {
    fn did_discover(&self, device: &DeviceInfo, rssi: Option<i16>, _advertisement: &Advertisement) {
        debug!(device = %device, rssi = ?rssi, "Discovered");
    }

    fn will_connect(&self, device: &DeviceInfo) {
        debug!(device = %device, "Connecting");
    }

    fn did_connect(&self, device: &DeviceInfo) {
        info!(device = %device, "Connected");
    }

    fn did_disconnect(&self, device: &DeviceInfo, retry: bool, reason: &DisconnectReason) {
        info!(device = %device, retry, reason = ?reason, "Disconnected");
    }

    fn did_fail_to_connect(&self, device: &DeviceInfo, error: &str, attempt: u32, will_retry: bool) {
        warn!(device = %device, attempt, will_retry, "Connect failed: {}", error);
    }

    fn power_state_changed(&self, state: AdapterPower) {
        info!(state = %state, "Adapter power changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingDelegate;

    #[test]
    fn test_notification_serialization() {
        let notification = Notification::Disconnected {
            device: DeviceInfo::with_name("AA:01", "Sensor"),
            retry: true,
            reason: DisconnectReason::LinkLost,
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"type\":\"disconnected\""));
        assert!(json.contains("\"link_lost\""));

        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, notification);
    }

    #[test]
    fn test_power_notification_json() {
        let json = serde_json::to_value(Notification::PowerChanged {
            state: AdapterPower::PoweredOn,
        })
        .unwrap();
        assert_eq!(json["type"], "power_changed");
        assert_eq!(json["state"], "powered_on");
    }

    #[test]
    fn test_kind_and_device() {
        let n = Notification::WillConnect {
            device: DeviceInfo::new("AA:01"),
        };
        assert_eq!(n.kind(), "will_connect");
        assert_eq!(n.device().map(|d| d.id.as_str()), Some("AA:01"));
        assert!(
            Notification::PowerChanged {
                state: AdapterPower::PoweredOff
            }
            .device()
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order_to_delegate_then_subscribers() {
        let delegate = Arc::new(RecordingDelegate::new());
        let channel = NotificationChannel::spawn(Some(delegate.clone()), 16);
        let mut rx = channel.subscribe();

        channel.send(Notification::PowerChanged {
            state: AdapterPower::PoweredOn,
        });
        channel.send(Notification::WillConnect {
            device: DeviceInfo::new("AA:01"),
        });
        channel.send(Notification::Connected {
            device: DeviceInfo::new("AA:01"),
        });

        assert_eq!(rx.recv().await.unwrap().kind(), "power_changed");
        assert_eq!(rx.recv().await.unwrap().kind(), "will_connect");
        assert_eq!(rx.recv().await.unwrap().kind(), "connected");

        channel.close().await;
        assert_eq!(
            delegate.kinds(),
            vec!["power_changed", "will_connect", "connected"]
        );
    }

    #[tokio::test]
    async fn test_close_drains_queue() {
        let delegate = Arc::new(RecordingDelegate::new());
        let channel = NotificationChannel::spawn(Some(delegate.clone()), 4);
        for _ in 0..10 {
            channel.send(Notification::PowerChanged {
                state: AdapterPower::Resetting,
            });
        }
        channel.close().await;
        assert_eq!(delegate.notifications().len(), 10);
    }
}
