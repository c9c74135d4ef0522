use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use rmt::{
    BufferAddress, DescriptorHeapType, DescriptorIndex, DescriptorKind, Limits, ResourceStates,
};
use thiserror::Error;

use crate::{
    binding_model::{LayoutError, RootBindingLayout, RootSignature},
    heap::DescriptorHeap,
    id::{markers, ResourceId},
    pipeline::{CreatePipelineError, Pipeline, PipelineDescriptor},
    registry::Registry,
    resource::{BufferDescriptor, Resource, ResourceDesc, ResourceError, TextureDescriptor},
    storage::StorageReport,
    view::{create_view_descriptor, CreateViewError, ViewDesc},
    Label,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Limit '{name}' can't be {value}")]
    LimitsExceeded { name: &'static str, value: u64 },
}

#[derive(Clone, Debug, Default)]
pub struct DeviceDescriptor<'a> {
    pub label: Label<'a>,
    pub limits: Limits,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapReport {
    pub capacity: DescriptorIndex,
    pub occupied: usize,
    pub populated_end: DescriptorIndex,
}

impl HeapReport {
    fn new(heap: &DescriptorHeap) -> Self {
        Self {
            capacity: heap.capacity(),
            occupied: heap.occupied_count(),
            populated_end: heap.populated_end(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceReport {
    pub resources: StorageReport,
    pub views: HeapReport,
    pub render_targets: HeapReport,
}

/// In-memory device: owns resources and the two descriptor heaps.
///
/// Lock order is resources first, heaps second.
#[derive(Debug)]
pub struct Device {
    label: String,
    limits: Limits,
    resources: Registry<Resource, markers::Resource>,
    views: RwLock<DescriptorHeap>,
    render_targets: RwLock<DescriptorHeap>,
}

impl Device {
    pub fn new(desc: &DeviceDescriptor) -> Result<Self, DeviceError> {
        let label = desc.label.as_deref().unwrap_or_default().to_string();
        let mut failed = None;
        desc.limits.check_limits_with_fail_fn(|name, value| {
            log::error!("Device '{}' requested {} = {}", label, name, value);
            if failed.is_none() {
                failed = Some(DeviceError::LimitsExceeded { name, value });
            }
        });
        if let Some(err) = failed {
            return Err(err);
        }

        log::info!("Creating device '{}' with {:?}", label, desc.limits);
        Ok(Self {
            label,
            views: RwLock::new(DescriptorHeap::new(
                DescriptorHeapType::CbvSrvUav,
                desc.limits.cbv_srv_uav_heap_capacity,
            )),
            render_targets: RwLock::new(DescriptorHeap::new(
                DescriptorHeapType::Rtv,
                desc.limits.rtv_heap_capacity,
            )),
            limits: desc.limits.clone(),
            resources: Registry::new("Resource"),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn create_buffer(&self, desc: &BufferDescriptor) -> Result<ResourceId, ResourceError> {
        let buffer = Resource::new_buffer(desc)?;
        let id = self.resources.register(buffer);
        log::debug!("Created buffer {:?} {:?} of {} bytes", id, desc.label, desc.size);
        Ok(id)
    }

    /// Creates a buffer holding `contents`.
    ///
    /// The buffer is at least as large as `contents` and keeps the state
    /// requested by `desc`.
    pub fn create_buffer_init(
        &self,
        desc: &BufferDescriptor,
        contents: &[u8],
    ) -> Result<ResourceId, ResourceError> {
        let size = desc.size.max(contents.len() as BufferAddress);
        let mut buffer = Resource::new_buffer(&BufferDescriptor {
            size,
            ..desc.clone()
        })?;
        buffer.data[..contents.len()].copy_from_slice(contents);
        let id = self.resources.register(buffer);
        log::debug!("Created buffer {:?} {:?} of {} bytes", id, desc.label, size);
        Ok(id)
    }

    pub fn create_texture(&self, desc: &TextureDescriptor) -> Result<ResourceId, ResourceError> {
        let texture = Resource::new_texture(desc, &self.limits)?;
        let id = self.resources.register(texture);
        log::debug!(
            "Created texture {:?} {:?} {}x{}x{} {:?}",
            id,
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers,
            desc.format
        );
        Ok(id)
    }

    pub fn upload_buffer(
        &self,
        id: ResourceId,
        offset: BufferAddress,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let mut storage = self.resources.write();
        let buffer = storage.get_mut(id).map_err(|_| ResourceError::Invalid(id))?;
        buffer.write_buffer(id, offset, data)
    }

    /// Uploads mip 0 of every array slice from rows `row_stride` bytes apart.
    pub fn upload_texture(
        &self,
        id: ResourceId,
        data: &[u8],
        row_stride: usize,
    ) -> Result<(), ResourceError> {
        let mut storage = self.resources.write();
        let texture = storage.get_mut(id).map_err(|_| ResourceError::Invalid(id))?;
        texture.write_texture(id, data, row_stride)
    }

    /// Moves one subresource, or all of them when `subresource` is `None`.
    pub fn transition(
        &self,
        id: ResourceId,
        subresource: Option<u32>,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Result<(), ResourceError> {
        let mut storage = self.resources.write();
        let resource = storage.get_mut(id).map_err(|_| ResourceError::Invalid(id))?;
        log::trace!("Transition {:?} {:?}: {:?} -> {:?}", id, subresource, before, after);
        resource.transition(id, subresource, before, after)
    }

    pub fn resource_state(
        &self,
        id: ResourceId,
        subresource: u32,
    ) -> Result<ResourceStates, ResourceError> {
        let storage = self.resources.read();
        let resource = storage.get(id).map_err(|_| ResourceError::Invalid(id))?;
        resource
            .state(subresource)
            .ok_or(ResourceError::InvalidSubresource {
                index: subresource,
                count: resource.desc().subresource_count(),
            })
    }

    pub fn resource_desc(&self, id: ResourceId) -> Result<ResourceDesc, ResourceError> {
        let storage = self.resources.read();
        storage
            .get(id)
            .map(|resource| *resource.desc())
            .map_err(|_| ResourceError::Invalid(id))
    }

    /// The label of `id`, or a placeholder naming the stale id.
    pub fn resource_label(&self, id: ResourceId) -> String {
        let storage = self.resources.read();
        match storage.get(id) {
            Ok(resource) if !resource.label().is_empty() => resource.label().to_string(),
            Ok(_) => format!("{} {:?}", storage.kind(), id),
            Err(_) => format!("<invalid {} {:?}>", storage.kind(), id),
        }
    }

    pub fn read_buffer(
        &self,
        id: ResourceId,
        offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<Vec<u8>, ResourceError> {
        let storage = self.resources.read();
        let buffer = storage.get(id).map_err(|_| ResourceError::Invalid(id))?;
        buffer.read_buffer(id, offset, size).map(<[u8]>::to_vec)
    }

    /// Destroys a resource no descriptor slot refers to.
    pub fn destroy_resource(&self, id: ResourceId) -> Result<(), ResourceError> {
        let mut storage = self.resources.write();
        if !storage.contains(id) {
            return Err(ResourceError::Invalid(id));
        }
        for heap in [&self.views, &self.render_targets] {
            if let Some(slot) = heap.read().references(id).next() {
                return Err(ResourceError::InUse { id, slot });
            }
        }
        self.resources.unregister_locked(id, &mut storage);
        log::debug!("Destroyed resource {:?}", id);
        Ok(())
    }

    /// Writes a view of `id` into the heap matching its kind.
    ///
    /// `slot` picks the heap index, `None` takes the lowest free one.
    pub fn create_view(
        &self,
        id: ResourceId,
        desc: &ViewDesc,
        slot: Option<DescriptorIndex>,
    ) -> Result<DescriptorIndex, CreateViewError> {
        let storage = self.resources.read();
        let resource = storage.get(id).map_err(|_| ResourceError::Invalid(id))?;
        let view = create_view_descriptor(id, resource.desc(), resource.flags(), desc, &self.limits)?;
        let heap = match view.kind {
            DescriptorKind::Rtv => &self.render_targets,
            _ => &self.views,
        };
        let index = heap.write().create_slot(slot, view)?;
        Ok(index)
    }

    /// Shorthand for [`Device::create_view`] with a render target view.
    pub fn create_rtv(
        &self,
        id: ResourceId,
        slot: Option<DescriptorIndex>,
    ) -> Result<DescriptorIndex, CreateViewError> {
        self.create_view(id, &ViewDesc::rtv(), slot)
    }

    /// The shader visible CBV/SRV/UAV heap.
    pub fn views(&self) -> RwLockReadGuard<'_, DescriptorHeap> {
        self.views.read()
    }

    /// The render target view heap.
    pub fn render_targets(&self) -> RwLockReadGuard<'_, DescriptorHeap> {
        self.render_targets.read()
    }

    pub fn create_root_signature(
        &self,
        layout: RootBindingLayout,
    ) -> Result<Arc<RootSignature>, LayoutError> {
        layout.freeze(&self.limits).map(Arc::new)
    }

    pub fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
    ) -> Result<Arc<Pipeline>, CreatePipelineError> {
        let pipeline = Pipeline::new(desc, &self.limits)?;
        log::debug!(
            "Created pipeline '{}' on root signature '{}'",
            pipeline.label(),
            pipeline.root_signature().label()
        );
        Ok(Arc::new(pipeline))
    }

    pub fn generate_report(&self) -> DeviceReport {
        DeviceReport {
            resources: self.resources.generate_report(),
            views: HeapReport::new(&self.views.read()),
            render_targets: HeapReport::new(&self.render_targets.read()),
        }
    }
}
