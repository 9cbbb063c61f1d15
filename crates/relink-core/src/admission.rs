//! Admission hook deciding which devices are pursued for connection.
//!
//! Consulted for every discovered device that clears the signal-strength
//! floor, and for every device handed back by a restore-state event (with no
//! advertisement). A rejection is not an error: the device stays visible to
//! the application but is never auto-connected.

use relink_types::Advertisement;

use crate::device::DeviceInfo;

/// Application-supplied predicate for auto-connect.
pub trait AdmissionPolicy: Send + Sync {
    /// Whether the manager should connect to `device`.
    fn should_connect_to(&self, device: &DeviceInfo, advertisement: Option<&Advertisement>)
    -> bool;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(&DeviceInfo, Option<&Advertisement>) -> bool + Send + Sync,
{
    fn should_connect_to(
        &self,
        device: &DeviceInfo,
        advertisement: Option<&Advertisement>,
    ) -> bool {
        self(device, advertisement)
    }
}

/// Connect to everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl AdmissionPolicy for AcceptAll {
    fn should_connect_to(&self, _device: &DeviceInfo, _advertisement: Option<&Advertisement>) -> bool {
        true
    }
}

/// Connect to nothing automatically; discovery is reported only.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

impl AdmissionPolicy for RejectAll {
    fn should_connect_to(&self, _device: &DeviceInfo, _advertisement: Option<&Advertisement>) -> bool {
        false
    }
}

/// Connect to devices whose name contains a pattern (case-insensitive).
///
/// The advertised local name is preferred over the cached device name.
/// Devices without any name never match.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: String,
}

impl NameFilter {
    /// Create a filter for names containing `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
        }
    }

    /// The lowercased pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl AdmissionPolicy for NameFilter {
    fn should_connect_to(&self, device: &DeviceInfo, advertisement: Option<&Advertisement>) -> bool {
        let name = advertisement
            .and_then(|adv| adv.local_name.as_deref())
            .or(device.name.as_deref());
        name.is_some_and(|name| name.to_lowercase().contains(&self.pattern))
    }
}
