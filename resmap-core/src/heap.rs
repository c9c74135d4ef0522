/*! Linearly addressed descriptor heaps.

A heap is a fixed-capacity array of descriptor slots. Slots are addressed by
absolute index, the same way a shader-visible `ID3D12DescriptorHeap` is
addressed by `heap_start + index * handle_size`. Writing into an occupied slot
replaces its content, there is no merging and no reference counting: slots
only name the resource they view.
!*/

use std::fmt;

use rmt::{DescriptorHeapType, DescriptorIndex, DescriptorKind};
use thiserror::Error;

use crate::{id::ResourceId, view::ViewDescriptor};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeapError {
    #[error("Descriptor index {index} is out of range for a heap of {capacity} descriptors")]
    CapacityExceeded {
        index: DescriptorIndex,
        capacity: DescriptorIndex,
    },
    #[error("All {capacity} descriptors of the heap are in use")]
    Full { capacity: DescriptorIndex },
    #[error("{kind:?} descriptors can't be written into a {ty:?} heap")]
    IncompatibleKind {
        kind: DescriptorKind,
        ty: DescriptorHeapType,
    },
}

/// A snapshot of one heap entry.
///
/// The kind tag is derived from the stored view, so the two always agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSlot {
    pub index: DescriptorIndex,
    pub view: Option<ViewDescriptor>,
}

impl DescriptorSlot {
    pub fn kind(&self) -> DescriptorKind {
        self.view.map_or(DescriptorKind::None, |view| view.kind)
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.view.map(|view| view.resource)
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_none()
    }
}

pub struct DescriptorHeap {
    ty: DescriptorHeapType,
    capacity: DescriptorIndex,
    /// Grows lazily up to the highest written index.
    slots: Vec<Option<ViewDescriptor>>,
    occupied: usize,
    /// No free slot exists below this index.
    cursor: DescriptorIndex,
}

impl fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("ty", &self.ty)
            .field("capacity", &self.capacity)
            .field("occupied", &self.occupied)
            .field("populated_end", &self.populated_end())
            .finish()
    }
}

impl DescriptorHeap {
    pub fn new(ty: DescriptorHeapType, capacity: DescriptorIndex) -> Self {
        log::debug!("Creating {:?} descriptor heap with {} slots", ty, capacity);
        Self {
            ty,
            capacity,
            slots: Vec::new(),
            occupied: 0,
            cursor: 0,
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn capacity(&self) -> DescriptorIndex {
        self.capacity
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied
    }

    /// One past the highest index ever written.
    pub fn populated_end(&self) -> DescriptorIndex {
        self.slots.len() as DescriptorIndex
    }

    /// Write `view` at `index`, or at the lowest free index when `index` is `None`.
    ///
    /// Returns the index that was written.
    pub fn create_slot(
        &mut self,
        index: Option<DescriptorIndex>,
        view: ViewDescriptor,
    ) -> Result<DescriptorIndex, HeapError> {
        if !self.ty.accepts(view.kind) {
            return Err(HeapError::IncompatibleKind {
                kind: view.kind,
                ty: self.ty,
            });
        }
        let index = match index {
            Some(index) => index,
            None => self.next_free()?,
        };
        if index >= self.capacity {
            log::error!(
                "Descriptor index {} is out of range for {:?} heap of {}",
                index,
                self.ty,
                self.capacity
            );
            return Err(HeapError::CapacityExceeded {
                index,
                capacity: self.capacity,
            });
        }

        let position = index as usize;
        if position >= self.slots.len() {
            self.slots.resize(position + 1, None);
        }
        match self.slots[position].replace(view) {
            Some(previous) => {
                log::trace!(
                    "Overwriting slot {} ({:?} of {:?}) with {:?} of {:?}",
                    index,
                    previous.kind,
                    previous.resource,
                    view.kind,
                    view.resource
                );
            }
            None => {
                log::trace!("Writing slot {} with {:?} of {:?}", index, view.kind, view.resource);
                self.occupied += 1;
            }
        }
        Ok(index)
    }

    fn next_free(&mut self) -> Result<DescriptorIndex, HeapError> {
        let start = self.cursor as usize;
        let found = self.slots[start.min(self.slots.len())..]
            .iter()
            .position(Option::is_none)
            .map(|offset| (start + offset) as DescriptorIndex)
            .unwrap_or_else(|| self.populated_end().max(self.cursor));
        if found >= self.capacity {
            log::error!("{:?} heap of {} descriptors is full", self.ty, self.capacity);
            return Err(HeapError::Full {
                capacity: self.capacity,
            });
        }
        self.cursor = found + 1;
        Ok(found)
    }

    /// The view stored at `index`, if anything was written there.
    pub fn view(&self, index: DescriptorIndex) -> Option<&ViewDescriptor> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// A snapshot of the slot at `index`.
    ///
    /// Indices past the populated range or the capacity yield an empty slot.
    pub fn slot(&self, index: DescriptorIndex) -> DescriptorSlot {
        DescriptorSlot {
            index,
            view: self.view(index).copied(),
        }
    }

    /// Iterate over written slots with an index at or above `start`.
    pub fn iter_occupied_from(
        &self,
        start: DescriptorIndex,
    ) -> impl Iterator<Item = (DescriptorIndex, &ViewDescriptor)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(start as usize)
            .filter_map(|(index, view)| view.as_ref().map(|view| (index as DescriptorIndex, view)))
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (DescriptorIndex, &ViewDescriptor)> + '_ {
        self.iter_occupied_from(0)
    }

    /// Indices of every slot that views `resource`.
    pub fn references(
        &self,
        resource: ResourceId,
    ) -> impl Iterator<Item = DescriptorIndex> + '_ {
        self.iter_occupied()
            .filter(move |&(_, view)| view.resource == resource)
            .map(|(index, _)| index)
    }
}
