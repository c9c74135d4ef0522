use parking_lot::Mutex;

use crate::{
    id::{Id, Marker},
    Epoch, Index,
};
use std::{fmt::Debug, marker::PhantomData};

/// A simple structure to allocate [`Id`] identifiers.
///
/// Calling [`alloc`] returns a fresh, never-before-seen id. Calling [`release`]
/// marks an id as dead; it will never be returned again by `alloc`.
///
/// Index values are kept dense: freed indices are reused, with a bumped
/// epoch, before new index values are handed out.
///
/// [`alloc`]: IdentityValues::alloc
/// [`release`]: IdentityValues::release
#[derive(Debug)]
pub(crate) struct IdentityValues {
    free: Vec<(Index, Epoch)>,
    next_index: Index,
}

impl IdentityValues {
    pub fn alloc<T: Marker>(&mut self) -> Id<T> {
        match self.free.pop() {
            Some((index, epoch)) => Id::zip(index, epoch + 1),
            None => {
                let index = self.next_index;
                self.next_index += 1;
                let epoch = 1;
                Id::zip(index, epoch)
            }
        }
    }

    /// Free `id`. It will never be returned from `alloc` again.
    pub fn release<T: Marker>(&mut self, id: Id<T>) {
        let (index, epoch) = id.unzip();
        self.free.push((index, epoch));
    }
}

#[derive(Debug)]
pub(crate) struct IdentityManager<T: Marker> {
    values: Mutex<IdentityValues>,
    _phantom: PhantomData<T>,
}

impl<T: Marker> IdentityManager<T> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(IdentityValues {
                free: Vec::new(),
                next_index: 0,
            }),
            _phantom: PhantomData,
        }
    }

    pub fn process(&self) -> Id<T> {
        self.values.lock().alloc()
    }

    pub fn free(&self, id: Id<T>) {
        self.values.lock().release(id)
    }
}

#[test]
fn test_epoch_end_of_life() {
    use crate::id;
    let man = IdentityManager::<id::markers::Resource>::new();
    let id1 = man.process();
    assert_eq!(id1.unzip(), (0, 1));
    man.free(id1);
    let id2 = man.process();
    // confirm that the epoch 1 is no longer re-used
    assert_eq!(id2.unzip(), (0, 2));
    // a fresh index is only used once the free list is empty
    assert_eq!(man.process().unzip(), (1, 1));
}
