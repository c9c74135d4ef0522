use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    id::{Id, Marker},
    identity::IdentityManager,
    storage::{Storage, StorageReport},
};

/// Registry is the primary holder of each object kind of a device.
///
/// Ids are minted by the identity manager and the objects live in the
/// storage table until they are unregistered. Both sides are locked
/// independently, so ids can be allocated while the storage is read.
#[derive(Debug)]
pub(crate) struct Registry<T, M: Marker> {
    identity: IdentityManager<M>,
    storage: RwLock<Storage<T, M>>,
}

impl<T, M: Marker> Registry<T, M> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            identity: IdentityManager::new(),
            storage: RwLock::new(Storage::new(kind)),
        }
    }

    pub(crate) fn register(&self, value: T) -> Id<M> {
        let id = self.identity.process();
        self.storage.write().insert(id, value);
        id
    }

    /// Remove `id` from `storage`, which the caller locked through [`Registry::write`].
    pub(crate) fn unregister_locked(&self, id: Id<M>, storage: &mut Storage<T, M>) -> Option<T> {
        let value = storage.remove(id);
        //Note: careful about the order here!
        if value.is_some() {
            self.identity.free(id);
        }
        value
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Storage<T, M>> {
        self.storage.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Storage<T, M>> {
        self.storage.write()
    }

    pub(crate) fn generate_report(&self) -> StorageReport {
        self.storage.read().generate_report()
    }
}
