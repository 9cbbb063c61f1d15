//! Durable reconnect identities.
//!
//! The manager records the identifier of every peripheral it starts
//! connecting to, and forgets it only when the application explicitly
//! disconnects. On the next power-on (or the next process start) every
//! remembered identifier is resolved back into a handle and connected.
//!
//! Writes must be durable before they return: a crash right after a
//! `connect` call has to leave the identity recoverable. The trait is
//! therefore synchronous and the manager calls it from its worker.

use std::sync::{Mutex, MutexGuard};

use relink_types::DeviceId;

use crate::error::Result;

/// Ordered, durable set of reconnect identifiers.
pub trait IdentityStore: Send + Sync {
    /// Remember an identifier. Adding one that is already present is a no-op.
    fn add_identity(&self, id: &DeviceId) -> Result<()>;

    /// Forget an identifier. Removing one that is absent is a no-op.
    fn remove_identity(&self, id: &DeviceId) -> Result<()>;

    /// All remembered identifiers in insertion order (empty when none).
    fn list_identities(&self) -> Result<Vec<DeviceId>>;

    /// Whether the identifier is remembered.
    fn contains_identity(&self, id: &DeviceId) -> Result<bool> {
        Ok(self.list_identities()?.contains(id))
    }
}

/// Process-local identity store.
///
/// Useful for tests and for applications that do not need reconnection
/// across restarts. Share one instance between managers through `Arc` to
/// simulate a restart.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    ids: Mutex<Vec<DeviceId>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with identifiers (duplicates dropped).
    pub fn with_identities<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        let store = Self::new();
        {
            let mut guard = store.lock();
            for id in ids {
                if !guard.contains(&id) {
                    guard.push(id);
                }
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceId>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn add_identity(&self, id: &DeviceId) -> Result<()> {
        let mut ids = self.lock();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        Ok(())
    }

    fn remove_identity(&self, id: &DeviceId) -> Result<()> {
        self.lock().retain(|existing| existing != id);
        Ok(())
    }

    fn list_identities(&self) -> Result<Vec<DeviceId>> {
        Ok(self.lock().clone())
    }
}

impl<T: IdentityStore + ?Sized> IdentityStore for std::sync::Arc<T> {
    fn add_identity(&self, id: &DeviceId) -> Result<()> {
        (**self).add_identity(id)
    }

    fn remove_identity(&self, id: &DeviceId) -> Result<()> {
        (**self).remove_identity(id)
    }

    fn list_identities(&self) -> Result<Vec<DeviceId>> {
        (**self).list_identities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_lists_nothing() {
        let store = MemoryIdentityStore::new();
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_add_is_idempotent_and_ordered() {
        let store = MemoryIdentityStore::new();
        store.add_identity(&DeviceId::new("b")).unwrap();
        store.add_identity(&DeviceId::new("a")).unwrap();
        store.add_identity(&DeviceId::new("b")).unwrap();

        assert_eq!(
            store.list_identities().unwrap(),
            vec![DeviceId::new("b"), DeviceId::new("a")]
        );
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = MemoryIdentityStore::new();
        store.add_identity(&DeviceId::new("a")).unwrap();
        store.remove_identity(&DeviceId::new("zz")).unwrap();
        store.remove_identity(&DeviceId::new("a")).unwrap();
        store.remove_identity(&DeviceId::new("a")).unwrap();
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_with_identities_drops_duplicates() {
        let store = MemoryIdentityStore::with_identities([
            DeviceId::new("x"),
            DeviceId::new("x"),
            DeviceId::new("y"),
        ]);
        assert_eq!(store.list_identities().unwrap().len(), 2);
        assert!(store.contains_identity(&DeviceId::new("y")).unwrap());
    }

    #[test]
    fn test_shared_store_through_arc() {
        let shared = std::sync::Arc::new(MemoryIdentityStore::new());
        let other = std::sync::Arc::clone(&shared);
        shared.add_identity(&DeviceId::new("a")).unwrap();
        assert_eq!(other.list_identities().unwrap(), vec![DeviceId::new("a")]);
    }
}
