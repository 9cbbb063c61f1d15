//! Seam to the service-model layer.
//!
//! Mapping a peripheral's services and characteristics onto application
//! models is outside this crate. The manager only drives the model's
//! lifecycle: bind once when the device is first registered, discover after
//! every successful connect, reset after every disconnect.

use std::sync::Arc;

use relink_types::DeviceId;

/// Per-device service model owned by the application.
pub trait ServiceModel: Send + Sync {
    /// Discover the services the application registered for this device.
    ///
    /// Called once per successful connect.
    fn discover_registered_services(&self);

    /// Drop any per-connection state (characteristic handles, subscriptions).
    ///
    /// Called once per disconnect, including disconnects caused by the
    /// adapter powering off.
    fn reset_services(&self);
}

/// Creates the service model for a device.
///
/// The manager calls [`ServiceBinder::bind`] at most once per tracked device.
pub trait ServiceBinder<H>: Send + Sync {
    /// Create the service model for the peripheral behind `handle`.
    fn bind(&self, id: &DeviceId, handle: &H) -> Arc<dyn ServiceModel>;
}

/// A service model with no services.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServiceModel;

impl ServiceModel for NoopServiceModel {
    fn discover_registered_services(&self) {}

    fn reset_services(&self) {}
}

/// Binder producing [`NoopServiceModel`]s, for applications that only care
/// about connection state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServiceBinder;

impl<H> ServiceBinder<H> for NoopServiceBinder {
    fn bind(&self, _id: &DeviceId, _handle: &H) -> Arc<dyn ServiceModel> {
        Arc::new(NoopServiceModel)
    }
}
