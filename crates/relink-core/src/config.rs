//! Connection manager configuration.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Configuration for the connection manager.
///
/// # Example
///
/// ```
/// use relink_core::{ManagerConfig, RetryPolicy};
///
/// let config = ManagerConfig::new()
///     .rssi_for_connect(-80)
///     .stop_scan_when_connecting(false)
///     .retry(RetryPolicy::bounded(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Whether `scan` while already scanning restarts the scan. When false the
    /// second call is ignored.
    pub allow_rescan: bool,
    /// Whether initiating a connect stops an active scan.
    pub stop_scan_when_connecting: bool,
    /// Whether a link loss triggers an immediate reconnect.
    pub should_connect_after_disconnect: bool,
    /// Minimum signal strength (dBm) for auto-connecting a discovered device.
    pub rssi_for_connect: Option<i16>,
    /// Policy for retrying failed connects.
    pub retry: RetryPolicy,
    /// Capacity of the notification broadcast buffer.
    pub notification_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            allow_rescan: true,
            stop_scan_when_connecting: true,
            should_connect_after_disconnect: true,
            rssi_for_connect: None,
            retry: RetryPolicy::default(),
            notification_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow or reject restarting an active scan.
    #[must_use]
    pub fn allow_rescan(mut self, allow: bool) -> Self {
        self.allow_rescan = allow;
        self
    }

    /// Stop scanning when a connect is initiated.
    #[must_use]
    pub fn stop_scan_when_connecting(mut self, stop: bool) -> Self {
        self.stop_scan_when_connecting = stop;
        self
    }

    /// Reconnect automatically after a link loss.
    #[must_use]
    pub fn should_connect_after_disconnect(mut self, reconnect: bool) -> Self {
        self.should_connect_after_disconnect = reconnect;
        self
    }

    /// Set the signal-strength floor for auto-connect.
    #[must_use]
    pub fn rssi_for_connect(mut self, dbm: i16) -> Self {
        self.rssi_for_connect = Some(dbm);
        self
    }

    /// Remove the signal-strength floor.
    #[must_use]
    pub fn no_rssi_floor(mut self) -> Self {
        self.rssi_for_connect = None;
        self
    }

    /// Set the connect retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the notification buffer capacity.
    #[must_use]
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Whether an advertisement with the given signal strength clears the
    /// auto-connect floor. A missing reading never clears a configured floor.
    pub fn passes_rssi_floor(&self, rssi: Option<i16>) -> bool {
        match (self.rssi_for_connect, rssi) {
            (None, _) => true,
            (Some(floor), Some(rssi)) => rssi >= floor,
            (Some(_), None) => false,
        }
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.notification_capacity == 0 {
            return Err(Error::invalid_config("notification_capacity must be > 0"));
        }
        if let Some(floor) = self.rssi_for_connect
            && !(-127..=20).contains(&floor)
        {
            return Err(Error::invalid_config(format!(
                "rssi_for_connect {} dBm is outside -127..=20",
                floor
            )));
        }
        self.retry.validate()
    }
}
