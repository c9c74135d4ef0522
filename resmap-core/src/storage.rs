use std::{marker::PhantomData, mem};

use crate::{
    id::{Id, Marker},
    Epoch, Index,
};

/// An entry in a `Storage::map` table.
#[derive(Debug)]
pub(crate) enum Element<T> {
    /// There are no live ids with this index.
    Vacant,

    /// There is one live id with this index, allocated at the given
    /// epoch.
    Occupied(T, Epoch),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageReport {
    pub num_occupied: usize,
    pub num_vacant: usize,
    pub element_size: usize,
}

impl StorageReport {
    pub fn is_empty(&self) -> bool {
        self.num_occupied + self.num_vacant == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InvalidId;

/// A table of `T` values indexed by the id type `Id<M>`.
///
/// The table is represented as a vector indexed by the ids' index
/// values, so ids should come from an `IdentityManager`, which keeps
/// the index values dense and close to zero.
#[derive(Debug)]
pub(crate) struct Storage<T, M: Marker> {
    map: Vec<Element<T>>,
    kind: &'static str,
    _phantom: PhantomData<M>,
}

impl<T, M: Marker> Storage<T, M> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            map: Vec::new(),
            kind,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn contains(&self, id: Id<M>) -> bool {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(_, storage_epoch)) => storage_epoch == epoch,
            Some(&Element::Vacant) | None => false,
        }
    }

    /// Get a reference to an item behind a potentially invalid ID.
    ///
    /// Fails if the slot is empty or holds an object of another epoch.
    pub(crate) fn get(&self, id: Id<M>) -> Result<&T, InvalidId> {
        let (index, epoch) = id.unzip();
        match self.map.get(index as usize) {
            Some(&Element::Occupied(ref value, storage_epoch)) if storage_epoch == epoch => {
                Ok(value)
            }
            _ => Err(InvalidId),
        }
    }

    pub(crate) fn get_mut(&mut self, id: Id<M>) -> Result<&mut T, InvalidId> {
        let (index, epoch) = id.unzip();
        match self.map.get_mut(index as usize) {
            Some(&mut Element::Occupied(ref mut value, storage_epoch))
                if storage_epoch == epoch =>
            {
                Ok(value)
            }
            _ => Err(InvalidId),
        }
    }

    pub(crate) fn insert(&mut self, id: Id<M>, value: T) {
        let (index, epoch) = id.unzip();
        let index = index as usize;
        if index >= self.map.len() {
            self.map.resize_with(index + 1, || Element::Vacant);
        }
        match mem::replace(&mut self.map[index], Element::Occupied(value, epoch)) {
            Element::Vacant => {}
            Element::Occupied(..) => panic!("{}[{}] is already occupied", self.kind, index),
        }
    }

    pub(crate) fn remove(&mut self, id: Id<M>) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let (index, _) = id.unzip();
        match mem::replace(&mut self.map[index as usize], Element::Vacant) {
            Element::Occupied(value, _) => Some(value),
            Element::Vacant => None,
        }
    }

    pub(crate) fn generate_report(&self) -> StorageReport {
        let mut report = StorageReport {
            element_size: mem::size_of::<T>(),
            ..Default::default()
        };
        for element in self.map.iter() {
            match *element {
                Element::Occupied(..) => report.num_occupied += 1,
                Element::Vacant => report.num_vacant += 1,
            }
        }
        report
    }
}
