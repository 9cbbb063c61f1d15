//! The manager's view of one physical peripheral.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use relink_types::DeviceId;

use crate::adapter::PeripheralHandle;
use crate::service::{ServiceBinder, ServiceModel};

/// Identity of a device as reported to the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier.
    pub id: DeviceId,
    /// Advertised name if known.
    pub name: Option<String>,
}

impl DeviceInfo {
    /// Create device info without a name.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Create device info with a name.
    pub fn with_name(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A tracked peripheral.
///
/// Wraps the adapter handle together with the service model binding. The
/// binding is attached lazily on the first connect and never replaced, so
/// the service layer sees exactly one model per device. Equality is the
/// stable identifier only.
///
/// Only the connection manager creates bindings; the rest of the crate sees
/// devices through shared references.
#[derive(Clone)]
pub struct Device<H> {
    id: DeviceId,
    name: Option<String>,
    handle: H,
    service: Option<Arc<dyn ServiceModel>>,
}

impl<H: PeripheralHandle> Device<H> {
    /// Wrap an adapter handle, taking the identifier and cached name from it.
    pub fn from_handle(handle: H) -> Self {
        Self {
            id: handle.id(),
            name: handle.name(),
            handle,
            service: None,
        }
    }

    /// Wrap an adapter handle with an advertised name.
    pub fn with_name(handle: H, name: Option<String>) -> Self {
        let mut device = Self::from_handle(handle);
        if name.is_some() {
            device.name = name;
        }
        device
    }

    /// Stable identifier.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Advertised name if known.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Adapter handle.
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Snapshot of the identity for notifications.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether the service model has been attached.
    pub fn is_registered(&self) -> bool {
        self.service.is_some()
    }

    /// Update the name, keeping an existing one when `name` is `None`.
    pub(crate) fn refresh_name(&mut self, name: Option<String>) {
        if name.is_some() {
            self.name = name;
        }
    }

    /// Replace the adapter handle, keeping the binding.
    ///
    /// Handles may be invalidated by an adapter power cycle while the device
    /// identity (and its service model) stays the same.
    pub(crate) fn refresh_handle(&mut self, handle: H) {
        self.handle = handle;
    }

    /// Attach the service model if none is attached yet. Returns whether a
    /// new binding was created.
    pub(crate) fn bind_service_model(&mut self, binder: &dyn ServiceBinder<H>) -> bool {
        if self.service.is_some() {
            return false;
        }
        self.service = Some(binder.bind(&self.id, &self.handle));
        true
    }

    /// Carry the binding over from another wrapper of the same peripheral.
    pub(crate) fn adopt_binding(&mut self, other: &Device<H>) {
        if self.service.is_none() {
            self.service = other.service.clone();
        }
    }

    /// Attach a model created earlier for this peripheral, unless one is
    /// already attached.
    pub(crate) fn attach_service_model(&mut self, model: Arc<dyn ServiceModel>) {
        if self.service.is_none() {
            self.service = Some(model);
        }
    }

    pub(crate) fn service_model(&self) -> Option<Arc<dyn ServiceModel>> {
        self.service.clone()
    }

    pub(crate) fn discover_services(&self) {
        if let Some(service) = &self.service {
            service.discover_registered_services();
        }
    }

    pub(crate) fn reset_services(&self) {
        if let Some(service) = &self.service {
            service.reset_services();
        }
    }
}

impl<H> PartialEq for Device<H> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<H> Eq for Device<H> {}

impl<H> fmt::Debug for Device<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("registered", &self.service.is_some())
            .finish_non_exhaustive()
    }
}
