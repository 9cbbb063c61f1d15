//! Core value types shared by the connection manager and its collaborators.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

/// Stable identifier of a physical peripheral.
///
/// On Linux and Windows this is the Bluetooth address (`AA:BB:CC:DD:EE:FF`).
/// On macOS the platform hides addresses, so it is the UUID CoreBluetooth
/// assigns to the peripheral. Either way it is the only thing device
/// equality is based on.
///
/// # Examples
///
/// ```
/// use relink_types::DeviceId;
///
/// let id = DeviceId::parse("  AA:BB:CC:DD:EE:FF ").unwrap();
/// assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
/// assert!(DeviceId::parse("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceId(String);

impl DeviceId {
    /// Create an identifier without validation.
    ///
    /// Prefer [`DeviceId::parse`] for user or storage input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse an identifier, trimming surrounding whitespace.
    pub fn parse(input: &str) -> ParseResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyIdentifier);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Power state of the local Bluetooth adapter.
///
/// Mirrors the states a platform radio stack reports. Only
/// [`AdapterPower::PoweredOn`] allows radio operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new states
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum AdapterPower {
    /// State not yet reported.
    #[default]
    Unknown,
    /// Connection with the system service was momentarily lost.
    Resetting,
    /// The host does not support the central role.
    Unsupported,
    /// The application is not authorized to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and available.
    PoweredOn,
}

impl AdapterPower {
    /// Whether radio operations are possible.
    #[must_use]
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterPower::PoweredOn)
    }

    /// Whether the adapter can never become usable without user action
    /// (missing hardware support or permission).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AdapterPower::Unsupported | AdapterPower::Unauthorized)
    }
}

impl fmt::Display for AdapterPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AdapterPower::Unknown => "unknown",
            AdapterPower::Resetting => "resetting",
            AdapterPower::Unsupported => "unsupported",
            AdapterPower::Unauthorized => "unauthorized",
            AdapterPower::PoweredOff => "off",
            AdapterPower::PoweredOn => "on",
        };
        f.write_str(label)
    }
}

impl FromStr for AdapterPower {
    type Err = ParseError;

    /// Parse a power state from its display label or variant name
    /// (case-insensitive).
    ///
    /// ```
    /// use relink_types::AdapterPower;
    ///
    /// assert_eq!("on".parse::<AdapterPower>(), Ok(AdapterPower::PoweredOn));
    /// assert_eq!("Powered_Off".parse::<AdapterPower>(), Ok(AdapterPower::PoweredOff));
    /// assert!("sideways".parse::<AdapterPower>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(AdapterPower::Unknown),
            "resetting" => Ok(AdapterPower::Resetting),
            "unsupported" => Ok(AdapterPower::Unsupported),
            "unauthorized" => Ok(AdapterPower::Unauthorized),
            "off" | "powered_off" | "poweredoff" => Ok(AdapterPower::PoweredOff),
            "on" | "powered_on" | "poweredon" => Ok(AdapterPower::PoweredOn),
            other => Err(ParseError::UnknownPowerState(other.to_string())),
        }
    }
}

/// Advertisement payload reported with a discovery.
///
/// Fields are whatever the radio stack decoded from the advertising and
/// scan-response packets; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Advertisement {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised transmit power in dBm.
    pub tx_power_level: Option<i16>,
    /// Manufacturer specific data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Create an advertisement carrying only a name and signal strength.
    pub fn new(local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            local_name,
            rssi,
            ..Default::default()
        }
    }

    /// Whether the advertisement lists the given service UUID.
    #[must_use]
    pub fn advertises_service(&self, service: &Uuid) -> bool {
        self.services.contains(service) || self.service_data.contains_key(service)
    }
}
