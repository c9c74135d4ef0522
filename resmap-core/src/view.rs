use rmt::{BufferAddress, DescriptorKind, Limits, ResourceFlags, TextureFormat};
use thiserror::Error;

use crate::{
    heap::HeapError,
    id::ResourceId,
    resource::{ResourceDesc, ResourceError},
};

/// Sub-range of a texture seen by a view.
///
/// Counts of zero extend to the end of the resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureSubresourceRange {
    /// Defaults to the resource format.
    pub format: Option<TextureFormat>,
    pub base_mip: u32,
    pub mip_count: u32,
    pub first_slice: u32,
    pub slice_count: u32,
}

impl TextureSubresourceRange {
    pub fn slices(mut self, first: u32, count: u32) -> Self {
        self.first_slice = first;
        self.slice_count = count;
        self
    }

    pub fn mips(mut self, base: u32, count: u32) -> Self {
        self.base_mip = base;
        self.mip_count = count;
        self
    }

    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Structured elements of a buffer seen by a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferElements {
    pub first_element: u64,
    pub element_count: u32,
    pub element_stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubresourceDesc {
    Buffer(BufferElements),
    Texture(TextureSubresourceRange),
}

/// What a caller asks for when creating a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ViewDesc {
    ConstantBuffer {
        offset: BufferAddress,
        size: BufferAddress,
    },
    ShaderResource(SubresourceDesc),
    UnorderedAccess(SubresourceDesc),
    RenderTarget(TextureSubresourceRange),
}

impl ViewDesc {
    pub fn cbv(offset: BufferAddress, size: BufferAddress) -> Self {
        Self::ConstantBuffer { offset, size }
    }

    /// Shader resource view of a whole texture.
    pub fn srv() -> Self {
        Self::ShaderResource(SubresourceDesc::Texture(TextureSubresourceRange::default()))
    }

    pub fn srv_texture(range: TextureSubresourceRange) -> Self {
        Self::ShaderResource(SubresourceDesc::Texture(range))
    }

    pub fn srv_buffer(elements: BufferElements) -> Self {
        Self::ShaderResource(SubresourceDesc::Buffer(elements))
    }

    pub fn uav_texture(range: TextureSubresourceRange) -> Self {
        Self::UnorderedAccess(SubresourceDesc::Texture(range))
    }

    pub fn uav_buffer(elements: BufferElements) -> Self {
        Self::UnorderedAccess(SubresourceDesc::Buffer(elements))
    }

    pub fn rtv() -> Self {
        Self::RenderTarget(TextureSubresourceRange::default())
    }

    pub fn kind(&self) -> DescriptorKind {
        match *self {
            Self::ConstantBuffer { .. } => DescriptorKind::Cbv,
            Self::ShaderResource(_) => DescriptorKind::Srv,
            Self::UnorderedAccess(_) => DescriptorKind::Uav,
            Self::RenderTarget(_) => DescriptorKind::Rtv,
        }
    }
}

/// The effective range a written view covers, with every default resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ViewRange {
    Bytes {
        offset: BufferAddress,
        size: BufferAddress,
    },
    Elements {
        first_element: u64,
        element_count: u32,
        element_stride: u32,
    },
    Texture {
        format: TextureFormat,
        base_mip: u32,
        mip_count: u32,
        first_slice: u32,
        slice_count: u32,
    },
}

/// Content of a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewDescriptor {
    pub resource: ResourceId,
    pub kind: DescriptorKind,
    pub range: ViewRange,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CreateViewError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("Constant buffer view at offset {offset} of size {size} is not aligned to {alignment} bytes")]
    Misaligned {
        offset: BufferAddress,
        size: BufferAddress,
        alignment: BufferAddress,
    },
    #[error("View size must be greater than zero")]
    ZeroSize,
    #[error("Buffer view element stride must be greater than zero")]
    ZeroStride,
    #[error("View range {start}..{end} exceeds the resource extent of {extent}")]
    OutOfBounds { start: u64, end: u64, extent: u64 },
    #[error("{kind:?} views can't be created on this {resource}")]
    WrongResourceType {
        kind: DescriptorKind,
        resource: &'static str,
    },
    #[error("View format {view:?} is not compatible with resource format {resource:?}")]
    IncompatibleFormat {
        view: TextureFormat,
        resource: TextureFormat,
    },
    #[error("Resource was not created with {0:?}")]
    MissingFlags(ResourceFlags),
    #[error("Render target views cover exactly one mip level, {0} were requested")]
    MultipleMips(u32),
}

fn check_range(start: u64, count: u64, extent: u64) -> Result<(), CreateViewError> {
    match start.checked_add(count) {
        Some(end) if end <= extent => Ok(()),
        _ => Err(CreateViewError::OutOfBounds {
            start,
            end: start.saturating_add(count),
            extent,
        }),
    }
}

/// Resolves a zero count into "everything from `start`".
fn resolve_count(start: u32, count: u32, extent: u32) -> Result<u32, CreateViewError> {
    let count = match count {
        0 => extent.saturating_sub(start),
        count => count,
    };
    if count == 0 {
        return Err(CreateViewError::OutOfBounds {
            start: start as u64,
            end: start as u64,
            extent: extent as u64,
        });
    }
    check_range(start as u64, count as u64, extent as u64)?;
    Ok(count)
}

/// Validate `desc` against the resource it views.
///
/// No memory is touched, the result only describes the viewed range.
pub fn create_view_descriptor(
    resource: ResourceId,
    resource_desc: &ResourceDesc,
    flags: ResourceFlags,
    desc: &ViewDesc,
    limits: &Limits,
) -> Result<ViewDescriptor, CreateViewError> {
    let kind = desc.kind();
    let wrong_type = || CreateViewError::WrongResourceType {
        kind,
        resource: if resource_desc.is_buffer() {
            "buffer"
        } else {
            "texture"
        },
    };
    match kind {
        DescriptorKind::Srv if flags.contains(ResourceFlags::DENY_SHADER_RESOURCE) => {
            return Err(CreateViewError::MissingFlags(
                ResourceFlags::DENY_SHADER_RESOURCE,
            ));
        }
        DescriptorKind::Uav if !flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) => {
            return Err(CreateViewError::MissingFlags(
                ResourceFlags::ALLOW_UNORDERED_ACCESS,
            ));
        }
        DescriptorKind::Rtv if !flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) => {
            return Err(CreateViewError::MissingFlags(ResourceFlags::ALLOW_RENDER_TARGET));
        }
        _ => {}
    }

    let range = match (*desc, *resource_desc) {
        (ViewDesc::ConstantBuffer { offset, size }, ResourceDesc::Buffer { size: extent, .. }) => {
            if size == 0 {
                return Err(CreateViewError::ZeroSize);
            }
            let alignment = limits.constant_buffer_alignment;
            let aligned = |value: BufferAddress| value.checked_rem(alignment) == Some(0);
            if !aligned(offset) || !aligned(size) {
                log::error!(
                    "Constant buffer view {}+{} is misaligned for {:?}",
                    offset,
                    size,
                    resource
                );
                return Err(CreateViewError::Misaligned {
                    offset,
                    size,
                    alignment,
                });
            }
            check_range(offset, size, extent)?;
            ViewRange::Bytes { offset, size }
        }
        (
            ViewDesc::ShaderResource(SubresourceDesc::Buffer(elements))
            | ViewDesc::UnorderedAccess(SubresourceDesc::Buffer(elements)),
            ResourceDesc::Buffer { size: extent, .. },
        ) => {
            if elements.element_stride == 0 {
                return Err(CreateViewError::ZeroStride);
            }
            if elements.element_count == 0 {
                return Err(CreateViewError::ZeroSize);
            }
            let stride = elements.element_stride as u64;
            let start = elements
                .first_element
                .checked_mul(stride)
                .unwrap_or(u64::MAX);
            check_range(start, elements.element_count as u64 * stride, extent)?;
            ViewRange::Elements {
                first_element: elements.first_element,
                element_count: elements.element_count,
                element_stride: elements.element_stride,
            }
        }
        (
            ViewDesc::ShaderResource(SubresourceDesc::Texture(range))
            | ViewDesc::UnorderedAccess(SubresourceDesc::Texture(range))
            | ViewDesc::RenderTarget(range),
            ResourceDesc::Texture {
                format,
                array_layers,
                mip_level_count,
                ..
            },
        ) => {
            let view_format = range.format.unwrap_or(format);
            if !format.is_view_compatible(view_format) {
                return Err(CreateViewError::IncompatibleFormat {
                    view: view_format,
                    resource: format,
                });
            }
            let mip_count = if kind == DescriptorKind::Rtv {
                if range.mip_count > 1 {
                    return Err(CreateViewError::MultipleMips(range.mip_count));
                }
                check_range(range.base_mip as u64, 1, mip_level_count as u64)?;
                1
            } else {
                resolve_count(range.base_mip, range.mip_count, mip_level_count)?
            };
            let slice_count = resolve_count(range.first_slice, range.slice_count, array_layers)?;
            ViewRange::Texture {
                format: view_format,
                base_mip: range.base_mip,
                mip_count,
                first_slice: range.first_slice,
                slice_count,
            }
        }
        _ => return Err(wrong_type()),
    };

    Ok(ViewDescriptor {
        resource,
        kind,
        range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmt::MemoryLocation;

    const CB: ResourceDesc = ResourceDesc::Buffer {
        size: 3072,
        location: MemoryLocation::Default,
    };

    const ARRAY: ResourceDesc = ResourceDesc::Texture {
        format: TextureFormat::R32Float,
        width: 2,
        height: 2,
        array_layers: 4,
        mip_level_count: 1,
    };

    fn make(resource: &ResourceDesc, desc: ViewDesc) -> Result<ViewDescriptor, CreateViewError> {
        create_view_descriptor(
            ResourceId::zip(0, 1),
            resource,
            ResourceFlags::empty(),
            &desc,
            &Limits::default(),
        )
    }

    #[test]
    fn cbv_array_slices() {
        for i in 0..12 {
            let view = make(&CB, ViewDesc::cbv(i * 256, 256)).unwrap();
            assert_eq!(view.kind, DescriptorKind::Cbv);
            assert_eq!(
                view.range,
                ViewRange::Bytes {
                    offset: i * 256,
                    size: 256
                }
            );
        }
        assert_eq!(
            make(&CB, ViewDesc::cbv(3072, 256)),
            Err(CreateViewError::OutOfBounds {
                start: 3072,
                end: 3328,
                extent: 3072
            })
        );
    }

    #[test]
    fn cbv_misaligned() {
        assert!(matches!(
            make(&CB, ViewDesc::cbv(100, 256)),
            Err(CreateViewError::Misaligned { offset: 100, .. })
        ));
        assert!(matches!(
            make(&CB, ViewDesc::cbv(0, 16)),
            Err(CreateViewError::Misaligned { size: 16, .. })
        ));
        assert_eq!(make(&CB, ViewDesc::cbv(0, 0)), Err(CreateViewError::ZeroSize));

        let unaligned = Limits {
            constant_buffer_alignment: 0,
            ..Limits::default()
        };
        assert!(matches!(
            create_view_descriptor(
                ResourceId::zip(0, 1),
                &CB,
                ResourceFlags::empty(),
                &ViewDesc::cbv(0, 256),
                &unaligned,
            ),
            Err(CreateViewError::Misaligned { alignment: 0, .. })
        ));
    }

    #[test]
    fn texture_srv_defaults_to_whole_resource() {
        let view = make(&ARRAY, ViewDesc::srv()).unwrap();
        assert_eq!(
            view.range,
            ViewRange::Texture {
                format: TextureFormat::R32Float,
                base_mip: 0,
                mip_count: 1,
                first_slice: 0,
                slice_count: 4,
            }
        );

        let tail = make(
            &ARRAY,
            ViewDesc::srv_texture(TextureSubresourceRange::default().slices(2, 0)),
        )
        .unwrap();
        assert!(matches!(
            tail.range,
            ViewRange::Texture {
                first_slice: 2,
                slice_count: 2,
                ..
            }
        ));
        assert!(matches!(
            make(
                &ARRAY,
                ViewDesc::srv_texture(TextureSubresourceRange::default().slices(2, 3))
            ),
            Err(CreateViewError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn wrong_resource_type() {
        assert_eq!(
            make(&ARRAY, ViewDesc::cbv(0, 256)),
            Err(CreateViewError::WrongResourceType {
                kind: DescriptorKind::Cbv,
                resource: "texture",
            })
        );
        assert!(matches!(
            make(&CB, ViewDesc::srv()),
            Err(CreateViewError::WrongResourceType { .. })
        ));
    }

    #[test]
    fn buffer_srv_elements() {
        let elements = BufferElements {
            first_element: 8,
            element_count: 4,
            element_stride: 16,
        };
        assert!(make(&CB, ViewDesc::srv_buffer(elements)).is_ok());
        let zero = BufferElements {
            element_stride: 0,
            ..elements
        };
        assert_eq!(
            make(&CB, ViewDesc::srv_buffer(zero)),
            Err(CreateViewError::ZeroStride)
        );
        let past = BufferElements {
            first_element: 190,
            ..elements
        };
        assert!(matches!(
            make(&CB, ViewDesc::srv_buffer(past)),
            Err(CreateViewError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn rtv_needs_flag() {
        assert_eq!(
            make(&ARRAY, ViewDesc::rtv()),
            Err(CreateViewError::MissingFlags(ResourceFlags::ALLOW_RENDER_TARGET))
        );
        let view = create_view_descriptor(
            ResourceId::zip(0, 1),
            &ARRAY,
            ResourceFlags::ALLOW_RENDER_TARGET,
            &ViewDesc::rtv(),
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(view.kind, DescriptorKind::Rtv);
    }
}
