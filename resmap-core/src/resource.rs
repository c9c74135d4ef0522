use std::borrow::Cow;

use rmt::{
    BufferAddress, Limits, MemoryLocation, ResourceFlags, ResourceStates, TextureFormat,
};
use thiserror::Error;

use crate::{id::ResourceId, Label};

/// Describes a [`Buffer`](ResourceDesc::Buffer).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferDescriptor<'a> {
    pub label: Label<'a>,
    pub size: BufferAddress,
    pub location: MemoryLocation,
    pub flags: ResourceFlags,
    /// Ignored for upload and readback buffers, whose state is fixed.
    pub initial_state: ResourceStates,
}

impl<'a> BufferDescriptor<'a> {
    pub fn new(label: Option<&'a str>, size: BufferAddress) -> Self {
        Self {
            label: label.map(Cow::Borrowed),
            size,
            location: MemoryLocation::Default,
            flags: ResourceFlags::empty(),
            initial_state: ResourceStates::COMMON,
        }
    }
}

/// Describes a 2D texture, possibly an array of slices.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureDescriptor<'a> {
    pub label: Label<'a>,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    /// Zero requests the full mip chain.
    pub mip_level_count: u32,
    pub flags: ResourceFlags,
    pub initial_state: ResourceStates,
}

impl<'a> TextureDescriptor<'a> {
    pub fn new(label: Option<&'a str>, format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            label: label.map(Cow::Borrowed),
            format,
            width,
            height,
            array_layers: 1,
            mip_level_count: 1,
            flags: ResourceFlags::empty(),
            initial_state: ResourceStates::COMMON,
        }
    }

    pub fn array(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub fn mips(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    pub fn render_target(mut self) -> Self {
        self.flags |= ResourceFlags::ALLOW_RENDER_TARGET;
        self.initial_state = ResourceStates::RENDER_TARGET;
        self
    }
}

/// Number of mip levels of a full chain ending at 1x1.
pub fn max_mips(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Immutable shape of a created resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceDesc {
    Buffer {
        size: BufferAddress,
        location: MemoryLocation,
    },
    Texture {
        format: TextureFormat,
        width: u32,
        height: u32,
        array_layers: u32,
        mip_level_count: u32,
    },
}

/// Placement of one subresource in the backing bytes of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub offset: usize,
    pub row_bytes: usize,
    pub rows: usize,
}

impl ResourceDesc {
    pub fn is_buffer(&self) -> bool {
        matches!(*self, Self::Buffer { .. })
    }

    pub fn is_texture(&self) -> bool {
        matches!(*self, Self::Texture { .. })
    }

    pub fn subresource_count(&self) -> u32 {
        match *self {
            Self::Buffer { .. } => 1,
            Self::Texture {
                array_layers,
                mip_level_count,
                ..
            } => array_layers * mip_level_count,
        }
    }

    /// D3D12 subresource numbering: mips vary fastest.
    pub fn subresource_index(&self, mip: u32, slice: u32) -> u32 {
        match *self {
            Self::Buffer { .. } => 0,
            Self::Texture {
                mip_level_count, ..
            } => mip + slice * mip_level_count,
        }
    }

    /// Where subresource `index` lives in the backing bytes.
    ///
    /// Subresources are tightly packed in subresource order.
    pub fn footprint(&self, index: u32) -> Option<SubresourceFootprint> {
        match *self {
            Self::Buffer { size, .. } => (index == 0).then_some(SubresourceFootprint {
                offset: 0,
                row_bytes: size as usize,
                rows: 1,
            }),
            Self::Texture {
                format,
                width,
                height,
                mip_level_count,
                ..
            } => {
                if index >= self.subresource_count() {
                    return None;
                }
                let mip_size = |mip: u32| {
                    let row = (width >> mip).max(1) as usize * format.block_size() as usize;
                    (row, (height >> mip).max(1) as usize)
                };
                let slice_bytes: usize = (0..mip_level_count)
                    .map(|mip| {
                        let (row, rows) = mip_size(mip);
                        row * rows
                    })
                    .sum();
                let slice = index / mip_level_count;
                let mip = index % mip_level_count;
                let offset = slice as usize * slice_bytes
                    + (0..mip)
                        .map(|m| {
                            let (row, rows) = mip_size(m);
                            row * rows
                        })
                        .sum::<usize>();
                let (row_bytes, rows) = mip_size(mip);
                Some(SubresourceFootprint {
                    offset,
                    row_bytes,
                    rows,
                })
            }
        }
    }

    pub fn byte_size(&self) -> usize {
        match *self {
            Self::Buffer { size, .. } => size as usize,
            Self::Texture { .. } => self
                .footprint(self.subresource_count() - 1)
                .map_or(0, |last| last.offset + last.row_bytes * last.rows),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResourceError {
    #[error("Resource {0:?} is invalid")]
    Invalid(ResourceId),
    #[error("Buffer size must be greater than zero")]
    ZeroSize,
    #[error("Texture dimensions {width}x{height} with {layers} slices are zero or exceed the limits")]
    InvalidDimension { width: u32, height: u32, layers: u32 },
    #[error("Texture mip level count {requested} is invalid, maximum allowed is {maximum}")]
    InvalidMipLevelCount { requested: u32, maximum: u32 },
    #[error("Resource {0:?} is not a buffer")]
    NotABuffer(ResourceId),
    #[error("Resource {0:?} is not a texture")]
    NotATexture(ResourceId),
    #[error("Subresource {index} is out of range, the resource has {count}")]
    InvalidSubresource { index: u32, count: u32 },
    #[error("Subresource {index} of {id:?} is in state {actual:?}, expected {expected:?}")]
    StateMismatch {
        id: ResourceId,
        index: u32,
        expected: ResourceStates,
        actual: ResourceStates,
    },
    #[error("Resource {id:?} in state {state:?} can't be written by the CPU")]
    NotWritable { id: ResourceId, state: ResourceStates },
    #[error("Access of {size} bytes at offset {offset} overruns the {len}-byte resource")]
    OutOfBounds {
        offset: BufferAddress,
        size: BufferAddress,
        len: BufferAddress,
    },
    #[error("Upload data holds {actual} bytes, {expected} are needed")]
    UploadTooSmall { expected: usize, actual: usize },
    #[error("Resource {id:?} is still referenced by descriptor slot {slot}")]
    InUse { id: ResourceId, slot: u32 },
}

/// A buffer or texture owned by a device.
#[derive(Debug)]
pub struct Resource {
    pub(crate) label: String,
    pub(crate) desc: ResourceDesc,
    pub(crate) flags: ResourceFlags,
    /// One entry per subresource.
    pub(crate) states: Vec<ResourceStates>,
    pub(crate) data: Vec<u8>,
}

impl Resource {
    pub(crate) fn new_buffer(desc: &BufferDescriptor) -> Result<Self, ResourceError> {
        if desc.size == 0 {
            return Err(ResourceError::ZeroSize);
        }
        let state = match desc.location {
            MemoryLocation::Default => desc.initial_state,
            MemoryLocation::Upload => ResourceStates::GENERIC_READ,
            MemoryLocation::Readback => ResourceStates::COPY_DEST,
        };
        Ok(Self {
            label: desc.label.as_deref().unwrap_or_default().to_string(),
            desc: ResourceDesc::Buffer {
                size: desc.size,
                location: desc.location,
            },
            flags: desc.flags,
            states: vec![state],
            data: vec![0; desc.size as usize],
        })
    }

    pub(crate) fn new_texture(
        desc: &TextureDescriptor,
        limits: &Limits,
    ) -> Result<Self, ResourceError> {
        let max_dim = limits.max_texture_dimension_2d;
        if desc.width == 0
            || desc.height == 0
            || desc.array_layers == 0
            || desc.width > max_dim
            || desc.height > max_dim
            || desc.array_layers > limits.max_texture_array_layers
        {
            return Err(ResourceError::InvalidDimension {
                width: desc.width,
                height: desc.height,
                layers: desc.array_layers,
            });
        }
        let maximum = max_mips(desc.width, desc.height);
        let mip_level_count = match desc.mip_level_count {
            0 => maximum,
            requested if requested > maximum => {
                return Err(ResourceError::InvalidMipLevelCount { requested, maximum })
            }
            requested => requested,
        };

        let shape = ResourceDesc::Texture {
            format: desc.format,
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            mip_level_count,
        };
        Ok(Self {
            label: desc.label.as_deref().unwrap_or_default().to_string(),
            desc: shape,
            flags: desc.flags,
            states: vec![desc.initial_state; shape.subresource_count() as usize],
            data: vec![0; shape.byte_size()],
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    pub fn state(&self, subresource: u32) -> Option<ResourceStates> {
        self.states.get(subresource as usize).copied()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Move `subresource`, or all of them when `None`, from `before` to `after`.
    ///
    /// All targeted subresources are checked before any is changed.
    pub(crate) fn transition(
        &mut self,
        id: ResourceId,
        subresource: Option<u32>,
        before: ResourceStates,
        after: ResourceStates,
    ) -> Result<(), ResourceError> {
        let count = self.states.len() as u32;
        let range = match subresource {
            Some(index) if index >= count => {
                return Err(ResourceError::InvalidSubresource { index, count })
            }
            Some(index) => index..index + 1,
            None => 0..count,
        };
        for index in range.clone() {
            let actual = self.states[index as usize];
            if actual != before {
                return Err(ResourceError::StateMismatch {
                    id,
                    index,
                    expected: before,
                    actual,
                });
            }
        }
        for index in range {
            self.states[index as usize] = after;
        }
        Ok(())
    }

    pub(crate) fn write_buffer(
        &mut self,
        id: ResourceId,
        offset: BufferAddress,
        bytes: &[u8],
    ) -> Result<(), ResourceError> {
        let location = match self.desc {
            ResourceDesc::Buffer { location, .. } => location,
            ResourceDesc::Texture { .. } => return Err(ResourceError::NotABuffer(id)),
        };
        let state = self.states[0];
        let writable = location == MemoryLocation::Upload
            || state == ResourceStates::COMMON
            || state.contains(ResourceStates::COPY_DEST);
        if !writable {
            return Err(ResourceError::NotWritable { id, state });
        }
        let range = self.byte_range(offset, bytes.len() as BufferAddress)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn read_buffer(
        &self,
        id: ResourceId,
        offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<&[u8], ResourceError> {
        if !self.desc.is_buffer() {
            return Err(ResourceError::NotABuffer(id));
        }
        let range = self.byte_range(offset, size)?;
        Ok(&self.data[range])
    }

    fn byte_range(
        &self,
        offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<std::ops::Range<usize>, ResourceError> {
        let len = self.data.len() as BufferAddress;
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(offset as usize..end as usize),
            _ => Err(ResourceError::OutOfBounds { offset, size, len }),
        }
    }

    /// Copy tightly strided `data` into mip 0 of every array slice.
    ///
    /// Each row copies `min(row_pitch, row_stride)` bytes, then every written
    /// subresource moves from `COPY_DEST` to `COMMON`.
    pub(crate) fn write_texture(
        &mut self,
        id: ResourceId,
        data: &[u8],
        row_stride: usize,
    ) -> Result<(), ResourceError> {
        let array_layers = match self.desc {
            ResourceDesc::Texture { array_layers, .. } => array_layers,
            ResourceDesc::Buffer { .. } => return Err(ResourceError::NotATexture(id)),
        };
        let targets = (0..array_layers)
            .map(|slice| self.desc.subresource_index(0, slice))
            .collect::<Vec<_>>();
        for &index in targets.iter() {
            let actual = self.states[index as usize];
            if actual != ResourceStates::COPY_DEST {
                return Err(ResourceError::StateMismatch {
                    id,
                    index,
                    expected: ResourceStates::COPY_DEST,
                    actual,
                });
            }
        }

        let mut src = 0;
        for &index in targets.iter() {
            let footprint = self
                .desc
                .footprint(index)
                .ok_or(ResourceError::InvalidSubresource {
                    index,
                    count: self.desc.subresource_count(),
                })?;
            let copy = footprint.row_bytes.min(row_stride);
            for row in 0..footprint.rows {
                let dst = footprint.offset + row * footprint.row_bytes;
                let bytes = data.get(src..src + copy).ok_or(ResourceError::UploadTooSmall {
                    expected: src + copy,
                    actual: data.len(),
                })?;
                self.data[dst..dst + copy].copy_from_slice(bytes);
                src += row_stride;
            }
        }
        for index in targets {
            self.states[index as usize] = ResourceStates::COMMON;
        }
        Ok(())
    }
}
