//! In-memory bookkeeping of tracked devices.
//!
//! Four identifier-keyed sets, each in insertion order:
//!
//! - `discovered`: advertisements seen since the current scan started
//! - `connecting`: devices with an initiated connect that has not completed
//! - `connected`: devices with a completed connection
//! - `pending_restore`: devices handed back by a restore-state event,
//!   waiting for the adapter to power on
//!
//! The registry is owned by the connection manager's worker and never shared,
//! so it needs no locking. Devices hold no reference back to it.

use indexmap::IndexMap;

use relink_types::DeviceId;

use crate::adapter::PeripheralHandle;
use crate::device::Device;

/// Identifier-keyed device sets.
#[derive(Debug)]
pub struct DeviceRegistry<H> {
    discovered: IndexMap<DeviceId, Device<H>>,
    connecting: IndexMap<DeviceId, Device<H>>,
    connected: IndexMap<DeviceId, Device<H>>,
    pending_restore: IndexMap<DeviceId, Device<H>>,
}

impl<H> Default for DeviceRegistry<H> {
    fn default() -> Self {
        Self {
            discovered: IndexMap::new(),
            connecting: IndexMap::new(),
            connected: IndexMap::new(),
            pending_restore: IndexMap::new(),
        }
    }
}

impl<H: PeripheralHandle> DeviceRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert into `discovered`. No-op (returns false) if already present.
    ///
    /// A device tracked in another set shares its service binding with the
    /// new entry.
    pub fn register(&mut self, mut device: Device<H>) -> bool {
        if self.discovered.contains_key(device.id()) {
            return false;
        }
        self.carry_binding(&mut device);
        self.discovered.insert(device.id().clone(), device);
        true
    }

    /// Track an initiated connect.
    ///
    /// Leaves a device that is already connected where it is (returns false);
    /// otherwise moves it out of `pending_restore` and into `connecting`.
    pub fn mark_connecting(&mut self, mut device: Device<H>) -> bool {
        let id = device.id().clone();
        if let Some(existing) = self.connected.get_mut(&id) {
            existing.adopt_binding(&device);
            existing.refresh_handle(device.handle().clone());
            return false;
        }
        self.carry_binding(&mut device);
        self.pending_restore.shift_remove(&id);
        self.connecting.insert(id, device);
        true
    }

    /// Move a device from any set into `connected`, replacing any existing
    /// entry with the same identifier.
    pub fn promote_to_connected(&mut self, mut device: Device<H>) {
        self.carry_binding(&mut device);
        let id = device.id().clone();
        self.discovered.shift_remove(&id);
        self.connecting.shift_remove(&id);
        self.pending_restore.shift_remove(&id);
        self.connected.shift_remove(&id);
        self.connected.insert(id, device);
    }

    /// Remove a device from every set, returning the most authoritative entry.
    pub fn remove(&mut self, id: &DeviceId) -> Option<Device<H>> {
        let connected = self.connected.shift_remove(id);
        let connecting = self.connecting.shift_remove(id);
        let discovered = self.discovered.shift_remove(id);
        let restore = self.pending_restore.shift_remove(id);
        connected.or(connecting).or(discovered).or(restore)
    }

    /// Remove a device from `connected` only.
    pub fn remove_connected(&mut self, id: &DeviceId) -> Option<Device<H>> {
        self.connected.shift_remove(id)
    }

    /// Remove a device from `connecting` only.
    pub fn remove_connecting(&mut self, id: &DeviceId) -> Option<Device<H>> {
        self.connecting.shift_remove(id)
    }

    /// Look up a device: connected first, then connecting, discovered and
    /// pending restore. A live connection wins over a stale discovery.
    pub fn find(&self, id: &DeviceId) -> Option<&Device<H>> {
        self.connected
            .get(id)
            .or_else(|| self.connecting.get(id))
            .or_else(|| self.discovered.get(id))
            .or_else(|| self.pending_restore.get(id))
    }

    /// Mutable lookup with the same priority as [`DeviceRegistry::find`].
    pub fn find_mut(&mut self, id: &DeviceId) -> Option<&mut Device<H>> {
        if self.connected.contains_key(id) {
            return self.connected.get_mut(id);
        }
        if self.connecting.contains_key(id) {
            return self.connecting.get_mut(id);
        }
        if self.discovered.contains_key(id) {
            return self.discovered.get_mut(id);
        }
        self.pending_restore.get_mut(id)
    }

    /// Whether the device is in any set.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.find(id).is_some()
    }

    /// Whether the device has a completed connection.
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.connected.contains_key(id)
    }

    /// Whether the device has an initiated connect.
    pub fn is_connecting(&self, id: &DeviceId) -> bool {
        self.connecting.contains_key(id)
    }

    /// Forget every discovery. Devices in other sets are unaffected.
    pub fn clear_discovered(&mut self) {
        self.discovered.clear();
    }

    /// Park a restored device until the adapter powers on.
    pub fn add_pending_restore(&mut self, mut device: Device<H>) {
        self.carry_binding(&mut device);
        self.pending_restore.insert(device.id().clone(), device);
    }

    /// Drain the pending restore set, in insertion order.
    pub fn take_pending_restore(&mut self) -> Vec<Device<H>> {
        self.pending_restore.drain(..).map(|(_, device)| device).collect()
    }

    /// Devices with a completed connection.
    pub fn connected(&self) -> impl Iterator<Item = &Device<H>> {
        self.connected.values()
    }

    /// Devices with an initiated connect.
    pub fn connecting(&self) -> impl Iterator<Item = &Device<H>> {
        self.connecting.values()
    }

    /// Devices discovered since the current scan started.
    pub fn discovered(&self) -> impl Iterator<Item = &Device<H>> {
        self.discovered.values()
    }

    /// Devices waiting for power-on restoration.
    pub fn pending_restore(&self) -> impl Iterator<Item = &Device<H>> {
        self.pending_restore.values()
    }

    /// Number of connected devices.
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    fn carry_binding(&self, device: &mut Device<H>) {
        if device.is_registered() {
            return;
        }
        if let Some(existing) = self.find(device.id()) {
            device.adopt_binding(existing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHandle, RecordingBinder};
    use proptest::prelude::*;

    fn device(id: &str) -> Device<MockHandle> {
        Device::from_handle(MockHandle::new(id, None))
    }

    #[test]
    fn test_register_is_noop_when_present() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.register(device("A")));
        assert!(!registry.register(device("A")));
        assert_eq!(registry.discovered().count(), 1);
    }

    #[test]
    fn test_promote_moves_from_every_set() {
        let mut registry = DeviceRegistry::new();
        registry.register(device("A"));
        registry.mark_connecting(device("A"));
        registry.add_pending_restore(device("A"));

        registry.promote_to_connected(device("A"));
        assert!(registry.is_connected(&DeviceId::new("A")));
        assert!(!registry.is_connecting(&DeviceId::new("A")));
        assert_eq!(registry.discovered().count(), 0);
        assert_eq!(registry.pending_restore().count(), 0);
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_promote_twice_keeps_one_entry() {
        let mut registry = DeviceRegistry::new();
        registry.promote_to_connected(device("A"));
        registry.promote_to_connected(device("A"));
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_find_priority() {
        let mut registry = DeviceRegistry::new();
        let stale = Device::with_name(MockHandle::new("A", None), Some("stale".into()));
        let live = Device::with_name(MockHandle::new("A", None), Some("live".into()));

        registry.add_pending_restore(stale.clone());
        assert_eq!(registry.find(&DeviceId::new("A")).and_then(|d| d.name()), Some("stale"));

        registry.register(stale);
        registry.promote_to_connected(live);
        registry.register(Device::with_name(MockHandle::new("A", None), Some("rediscovered".into())));
        assert_eq!(registry.find(&DeviceId::new("A")).and_then(|d| d.name()), Some("live"));
    }

    #[test]
    fn test_clear_discovered_keeps_connecting() {
        let mut registry = DeviceRegistry::new();
        registry.register(device("A"));
        registry.register(device("B"));
        registry.mark_connecting(device("B"));
        registry.clear_discovered();

        assert!(registry.find(&DeviceId::new("A")).is_none());
        assert!(registry.is_connecting(&DeviceId::new("B")));
    }

    #[test]
    fn test_mark_connecting_leaves_connected_device() {
        let mut registry = DeviceRegistry::new();
        registry.promote_to_connected(device("A"));
        assert!(!registry.mark_connecting(device("A")));
        assert!(registry.is_connected(&DeviceId::new("A")));
        assert!(!registry.is_connecting(&DeviceId::new("A")));
    }

    #[test]
    fn test_remove_from_every_set() {
        let mut registry = DeviceRegistry::new();
        registry.register(device("A"));
        registry.promote_to_connected(device("A"));
        registry.add_pending_restore(device("A"));
        assert!(registry.remove(&DeviceId::new("A")).is_some());
        assert!(!registry.contains(&DeviceId::new("A")));
        assert!(registry.remove(&DeviceId::new("A")).is_none());
    }

    #[test]
    fn test_binding_is_shared_across_sets() {
        let binder = RecordingBinder::new();
        let mut registry = DeviceRegistry::new();
        let mut bound = device("A");
        bound.bind_service_model(&binder);
        registry.register(bound);

        registry.mark_connecting(device("A"));
        registry.promote_to_connected(device("A"));
        let connected = registry.find(&DeviceId::new("A")).unwrap();
        assert!(connected.is_registered());
        assert_eq!(binder.bind_count(&DeviceId::new("A")), 1);
    }

    #[test]
    fn test_take_pending_restore_drains_in_order() {
        let mut registry = DeviceRegistry::new();
        registry.add_pending_restore(device("B"));
        registry.add_pending_restore(device("A"));
        let ids: Vec<_> = registry
            .take_pending_restore()
            .into_iter()
            .map(|d| d.id().clone())
            .collect();
        assert_eq!(ids, vec![DeviceId::new("B"), DeviceId::new("A")]);
        assert_eq!(registry.pending_restore().count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u8),
        Connecting(u8),
        Promote(u8),
        Remove(u8),
        RemoveConnected(u8),
        Restore(u8),
        TakeRestore,
        ClearDiscovered,
    }

    fn op() -> impl Strategy<Value = Op> {
        let id = 0u8..6;
        prop_oneof![
            id.clone().prop_map(Op::Register),
            id.clone().prop_map(Op::Connecting),
            id.clone().prop_map(Op::Promote),
            id.clone().prop_map(Op::Remove),
            id.clone().prop_map(Op::RemoveConnected),
            id.prop_map(Op::Restore),
            Just(Op::TakeRestore),
            Just(Op::ClearDiscovered),
        ]
    }

    proptest! {
        #[test]
        fn prop_connected_holds_each_id_at_most_once(ops in prop::collection::vec(op(), 0..64)) {
            let mut registry = DeviceRegistry::new();
            for op in ops {
                match op {
                    Op::Register(n) => { registry.register(device(&n.to_string())); }
                    Op::Connecting(n) => { registry.mark_connecting(device(&n.to_string())); }
                    Op::Promote(n) => registry.promote_to_connected(device(&n.to_string())),
                    Op::Remove(n) => { registry.remove(&DeviceId::new(n.to_string())); }
                    Op::RemoveConnected(n) => { registry.remove_connected(&DeviceId::new(n.to_string())); }
                    Op::Restore(n) => registry.add_pending_restore(device(&n.to_string())),
                    Op::TakeRestore => { registry.take_pending_restore(); }
                    Op::ClearDiscovered => registry.clear_discovered(),
                }

                let mut ids: Vec<_> = registry.connected().map(|d| d.id().clone()).collect();
                let total = ids.len();
                ids.sort();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);

                for device in registry.connected() {
                    prop_assert!(!registry.is_connecting(device.id()));
                }
            }
        }
    }
}
