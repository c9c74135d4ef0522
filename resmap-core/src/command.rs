use std::sync::Arc;

use arrayvec::ArrayVec;
use rmt::{BufferAddress, DescriptorHeapType, DescriptorIndex, MAX_RENDER_TARGETS};
use thiserror::Error;

use crate::{
    binding_model::{RootIndex, RootParameter, RootSignature},
    device::Device,
    id::ResourceId,
    pipeline::Pipeline,
    resolve::{RootArgument, RootArguments},
    resource::{ResourceDesc, ResourceError},
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    #[error("No pipeline is set")]
    NoPipeline,
    #[error("No root signature is set")]
    NoRootSignature,
    #[error("Root signature '{bound}' doesn't match '{expected}', which pipeline '{pipeline}' was built with")]
    LayoutMismatch {
        pipeline: String,
        expected: String,
        bound: String,
    },
    #[error("Descriptor tables are bound, but no descriptor heap is set")]
    NoDescriptorHeap,
    #[error("{0:?} heaps are not shader visible")]
    InvalidHeapType(DescriptorHeapType),
    #[error("Root index {index} is out of range, the root signature has {count} parameters")]
    InvalidRootIndex { index: RootIndex, count: usize },
    #[error("Root parameter {index} is not a {expected}")]
    ArgumentTypeMismatch {
        index: RootIndex,
        expected: &'static str,
    },
    #[error("{count} render targets are set, at most {max} are supported")]
    TooManyRenderTargets { count: usize, max: usize },
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Root constant buffer offset {offset} is not aligned to {alignment} bytes")]
    MisalignedRootOffset {
        offset: BufferAddress,
        alignment: BufferAddress,
    },
    #[error("Root constant buffer offset {offset} is outside of the {size} byte buffer")]
    RootOffsetOutOfBounds {
        offset: BufferAddress,
        size: BufferAddress,
    },
}

/// Everything a draw needs to be inspected later.
#[derive(Clone, Debug)]
pub struct DrawCall {
    pub marker: Option<String>,
    pub pipeline: Arc<Pipeline>,
    pub root_signature: Arc<RootSignature>,
    pub arguments: RootArguments,
    pub descriptor_heap: Option<DescriptorHeapType>,
    /// Indices into the render target view heap.
    pub render_targets: ArrayVec<DescriptorIndex, MAX_RENDER_TARGETS>,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Debug, Default)]
struct State {
    marker: Option<String>,
    pipeline: Option<Arc<Pipeline>>,
    root_signature: Option<Arc<RootSignature>>,
    arguments: RootArguments,
    descriptor_heap: Option<DescriptorHeapType>,
    render_targets: ArrayVec<DescriptorIndex, MAX_RENDER_TARGETS>,
}

/// Records binding state and draws.
///
/// Nothing is executed, each draw keeps a snapshot of the state it saw.
#[derive(Debug, Default)]
pub struct CommandList {
    label: String,
    state: State,
    draws: Vec<DrawCall>,
}

impl CommandList {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Names the draws recorded from now on.
    pub fn set_marker(&mut self, marker: &str) {
        self.state.marker = Some(marker.to_string());
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<Pipeline>) {
        self.state.pipeline = Some(Arc::clone(pipeline));
    }

    /// Binds a root signature. Root arguments are reset when it changes.
    pub fn set_root_signature(&mut self, signature: &Arc<RootSignature>) {
        let same = self
            .state
            .root_signature
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, signature));
        if !same {
            self.state.arguments.clear();
        }
        self.state.root_signature = Some(Arc::clone(signature));
    }

    pub fn set_descriptor_heap(&mut self, ty: DescriptorHeapType) -> Result<(), CommandError> {
        match ty {
            DescriptorHeapType::CbvSrvUav => {
                self.state.descriptor_heap = Some(ty);
                Ok(())
            }
            DescriptorHeapType::Rtv => Err(CommandError::InvalidHeapType(ty)),
        }
    }

    pub fn set_render_targets(&mut self, targets: &[DescriptorIndex]) -> Result<(), CommandError> {
        if targets.len() > MAX_RENDER_TARGETS {
            return Err(CommandError::TooManyRenderTargets {
                count: targets.len(),
                max: MAX_RENDER_TARGETS,
            });
        }
        self.state.render_targets = targets.iter().copied().collect();
        Ok(())
    }

    fn root_parameter(&self, index: RootIndex) -> Result<RootParameter, CommandError> {
        let signature = self
            .state
            .root_signature
            .as_ref()
            .ok_or(CommandError::NoRootSignature)?;
        signature
            .parameter(index)
            .copied()
            .ok_or(CommandError::InvalidRootIndex {
                index,
                count: signature.parameters().len(),
            })
    }

    fn set_argument(
        &mut self,
        index: RootIndex,
        argument: RootArgument,
    ) -> Result<(), CommandError> {
        let count = self
            .state
            .root_signature
            .as_ref()
            .map_or(0, |signature| signature.parameters().len());
        self.state
            .arguments
            .set(index, argument)
            .map_err(|_| CommandError::InvalidRootIndex { index, count })
    }

    /// Binds `offset` bytes into the buffer `resource` to an inline root parameter.
    ///
    /// The offset must be aligned to the device's constant buffer alignment and
    /// lie inside the buffer.
    pub fn set_root_constant_buffer_view(
        &mut self,
        device: &Device,
        index: RootIndex,
        resource: ResourceId,
        offset: BufferAddress,
    ) -> Result<(), CommandError> {
        if let RootParameter::Table(_) = self.root_parameter(index)? {
            return Err(CommandError::ArgumentTypeMismatch {
                index,
                expected: "root descriptor",
            });
        }
        let size = match device.resource_desc(resource)? {
            ResourceDesc::Buffer { size, .. } => size,
            ResourceDesc::Texture { .. } => {
                return Err(ResourceError::NotABuffer(resource).into())
            }
        };
        let alignment = device.limits().constant_buffer_alignment;
        if offset.checked_rem(alignment) != Some(0) {
            return Err(CommandError::MisalignedRootOffset { offset, alignment });
        }
        if offset >= size {
            return Err(CommandError::RootOffsetOutOfBounds { offset, size });
        }
        self.set_argument(index, RootArgument::ConstantBuffer { resource, offset })
    }

    pub fn set_root_descriptor_table(
        &mut self,
        index: RootIndex,
        base: DescriptorIndex,
    ) -> Result<(), CommandError> {
        match self.root_parameter(index)? {
            RootParameter::Table(_) => self.set_argument(index, RootArgument::Table { base }),
            RootParameter::Inline(_) => Err(CommandError::ArgumentTypeMismatch {
                index,
                expected: "descriptor table",
            }),
        }
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<(), CommandError> {
        let pipeline = self.state.pipeline.as_ref().ok_or(CommandError::NoPipeline)?;
        let signature = self
            .state
            .root_signature
            .as_ref()
            .ok_or(CommandError::NoRootSignature)?;
        if !pipeline.is_compatible(signature) {
            log::warn!(
                "Draw with pipeline '{}' and foreign root signature '{}' rejected",
                pipeline.label(),
                signature.label()
            );
            return Err(CommandError::LayoutMismatch {
                pipeline: pipeline.label().to_string(),
                expected: pipeline.root_signature().label().to_string(),
                bound: signature.label().to_string(),
            });
        }
        if self.state.descriptor_heap.is_none() && self.state.arguments.uses_tables() {
            return Err(CommandError::NoDescriptorHeap);
        }

        log::trace!(
            "Recording draw {} of '{}' under {:?}",
            self.draws.len(),
            self.label,
            self.state.marker
        );
        self.draws.push(DrawCall {
            marker: self.state.marker.clone(),
            pipeline: Arc::clone(pipeline),
            root_signature: Arc::clone(signature),
            arguments: self.state.arguments.clone(),
            descriptor_heap: self.state.descriptor_heap,
            render_targets: self.state.render_targets.clone(),
            vertex_count,
            instance_count,
        });
        Ok(())
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn find_draw(&self, marker: &str) -> Option<&DrawCall> {
        self.draws
            .iter()
            .find(|draw| draw.marker.as_deref() == Some(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binding_model::RootBindingLayout,
        device::DeviceDescriptor,
        pipeline::{PipelineDescriptor, ShaderInterface},
        resource::{BufferDescriptor, TextureDescriptor},
    };
    use rmt::{DescriptorRangeType::Srv, Limits, TextureFormat};

    fn constant_buffer(size: BufferAddress) -> (Device, ResourceId) {
        let device = Device::new(&DeviceDescriptor::default()).unwrap();
        let cb = device
            .create_buffer(&BufferDescriptor::new(Some("cb"), size))
            .unwrap();
        (device, cb)
    }

    fn setup(label: &str) -> (Arc<RootSignature>, Arc<Pipeline>) {
        let limits = Limits::default();
        let signature = Arc::new(
            RootBindingLayout::with_label(label)
                .inline_cbv(0, 3)
                .table(Srv, 0, 0, 1, 56)
                .freeze(&limits)
                .unwrap(),
        );
        let pipeline = Pipeline::new(
            &PipelineDescriptor {
                label: Some(label.into()),
                root_signature: Arc::clone(&signature),
                vertex: ShaderInterface::new(),
                pixel: None,
                render_targets: &[],
            },
            &limits,
        )
        .unwrap();
        (signature, Arc::new(pipeline))
    }

    #[test]
    fn draw_snapshots_arguments() {
        let (signature, pipeline) = setup("sig");
        let (device, cb) = constant_buffer(256);
        let mut list = CommandList::new("test");
        list.set_marker("first");
        list.set_pipeline(&pipeline);
        list.set_root_signature(&signature);
        list.set_descriptor_heap(DescriptorHeapType::CbvSrvUav).unwrap();
        list.set_root_constant_buffer_view(&device, 0, cb, 0).unwrap();
        list.set_root_descriptor_table(1, 0).unwrap();
        list.draw(3, 1).unwrap();

        list.set_marker("second");
        list.set_root_descriptor_table(1, 8).unwrap();
        list.draw(3, 1).unwrap();

        assert_eq!(list.draws().len(), 2);
        let first = list.find_draw("first").unwrap();
        assert_eq!(first.arguments.get(1), Some(RootArgument::Table { base: 0 }));
        let second = list.find_draw("second").unwrap();
        assert_eq!(second.arguments.get(1), Some(RootArgument::Table { base: 8 }));
    }

    #[test]
    fn mismatched_signature_is_rejected() {
        let (_, pipeline) = setup("built");
        let (other, _) = setup("other");
        let mut list = CommandList::new("test");
        list.set_pipeline(&pipeline);
        list.set_root_signature(&other);
        assert_eq!(
            list.draw(3, 1),
            Err(CommandError::LayoutMismatch {
                pipeline: "built".to_string(),
                expected: "built".to_string(),
                bound: "other".to_string(),
            })
        );
        assert!(list.draws().is_empty());
    }

    #[test]
    fn root_argument_validation() {
        let (signature, pipeline) = setup("sig");
        let mut list = CommandList::new("test");
        assert_eq!(
            list.set_root_descriptor_table(1, 0),
            Err(CommandError::NoRootSignature)
        );
        list.set_root_signature(&signature);
        assert_eq!(
            list.set_root_descriptor_table(2, 0),
            Err(CommandError::InvalidRootIndex { index: 2, count: 2 })
        );
        assert!(matches!(
            list.set_root_descriptor_table(0, 0),
            Err(CommandError::ArgumentTypeMismatch { index: 0, .. })
        ));

        list.set_pipeline(&pipeline);
        list.set_root_descriptor_table(1, 0).unwrap();
        assert_eq!(list.draw(3, 1), Err(CommandError::NoDescriptorHeap));
        assert_eq!(
            list.set_descriptor_heap(DescriptorHeapType::Rtv),
            Err(CommandError::InvalidHeapType(DescriptorHeapType::Rtv))
        );
    }

    #[test]
    fn changing_signature_clears_arguments() {
        let (first, pipeline) = setup("first");
        let (second, _) = setup("second");
        let mut list = CommandList::new("test");
        list.set_pipeline(&pipeline);
        list.set_descriptor_heap(DescriptorHeapType::CbvSrvUav).unwrap();
        list.set_root_signature(&first);
        list.set_root_descriptor_table(1, 0).unwrap();
        list.set_root_signature(&first);
        list.set_root_signature(&second);
        list.set_root_signature(&first);
        list.draw(3, 1).unwrap();
        assert_eq!(list.draws()[0].arguments.get(1), None);
    }

    #[test]
    fn root_constant_buffer_offset_is_checked() {
        let (signature, pipeline) = setup("sig");
        let (device, cb) = constant_buffer(512);
        let mut list = CommandList::new("test");
        list.set_pipeline(&pipeline);
        list.set_root_signature(&signature);

        list.set_root_constant_buffer_view(&device, 0, cb, 256).unwrap();
        assert_eq!(
            list.set_root_constant_buffer_view(&device, 0, cb, 100),
            Err(CommandError::MisalignedRootOffset {
                offset: 100,
                alignment: 256,
            })
        );
        assert_eq!(
            list.set_root_constant_buffer_view(&device, 0, cb, 512),
            Err(CommandError::RootOffsetOutOfBounds {
                offset: 512,
                size: 512,
            })
        );
        assert_eq!(
            list.set_root_constant_buffer_view(&device, 0, cb, u64::MAX - 255),
            Err(CommandError::RootOffsetOutOfBounds {
                offset: u64::MAX - 255,
                size: 512,
            })
        );

        let texture = device
            .create_texture(&TextureDescriptor::new(
                Some("tex"),
                TextureFormat::Rgba8Unorm,
                2,
                2,
            ))
            .unwrap();
        assert_eq!(
            list.set_root_constant_buffer_view(&device, 0, texture, 0),
            Err(CommandError::Resource(ResourceError::NotABuffer(texture)))
        );

        // the last valid offset is kept
        list.draw(3, 1).unwrap();
        assert_eq!(
            list.draws()[0].arguments.get(0),
            Some(RootArgument::ConstantBuffer {
                resource: cb,
                offset: 256,
            })
        );
    }
}
