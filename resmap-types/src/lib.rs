/*! This library describes the data surface of the resmap binding model.
 *  It carries no logic beyond small conversions and is shared by the core
 *  crate and the tools built on top of it.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integral type used for buffer offsets and sizes.
pub type BufferAddress = u64;
/// Integral type used for register spaces.
pub type RegisterSpace = u32;
/// Integral type used for shader registers.
pub type ShaderRegister = u32;
/// Integral type used for indices into a descriptor heap.
pub type DescriptorIndex = u32;

/// Constant buffer views must be placed on, and sized in multiples of, this number of bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: BufferAddress = 256;
/// Raw descriptor count meaning "until the end of the heap".
pub const UNBOUNDED_DESCRIPTOR_COUNT: u32 = u32::MAX;
/// Maximum number of simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;
/// Largest root signature the hardware accepts, in DWORDs.
pub const MAX_ROOT_SIGNATURE_DWORDS: u32 = 64;
/// Root signature cost of a descriptor table parameter, in DWORDs.
pub const ROOT_TABLE_DWORDS: u32 = 1;
/// Root signature cost of an inline root descriptor, in DWORDs.
pub const ROOT_DESCRIPTOR_DWORDS: u32 = 2;

bitflags::bitflags! {
    /// Describes the shader stages a root parameter is visible from.
    ///
    /// `ALL` corresponds to `D3D12_SHADER_VISIBILITY_ALL`.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
    pub struct ShaderStages: u32 {
        /// Not visible from any stage.
        const NONE = 0;
        /// Vertex shader.
        const VERTEX = 1 << 0;
        /// Hull shader.
        const HULL = 1 << 1;
        /// Domain shader.
        const DOMAIN = 1 << 2;
        /// Geometry shader.
        const GEOMETRY = 1 << 3;
        /// Pixel shader.
        const PIXEL = 1 << 4;
        /// Every graphics stage.
        const ALL = Self::VERTEX.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits()
            | Self::GEOMETRY.bits()
            | Self::PIXEL.bits();
    }
}

/// Type of the descriptors a table range or an inline parameter refers to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorRangeType {
    /// Constant buffer views, `b` registers.
    Cbv,
    /// Shader resource views, `t` registers.
    Srv,
    /// Unordered access views, `u` registers.
    Uav,
}

impl DescriptorRangeType {
    /// HLSL register prefix of this range type.
    pub fn register_prefix(self) -> char {
        match self {
            Self::Cbv => 'b',
            Self::Srv => 't',
            Self::Uav => 'u',
        }
    }
}

/// Kind tag of a descriptor slot.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorKind {
    /// Nothing was ever written.
    #[default]
    None,
    /// Constant buffer view.
    Cbv,
    /// Shader resource view.
    Srv,
    /// Unordered access view.
    Uav,
    /// Render target view.
    Rtv,
}

impl DescriptorKind {
    /// The range type a shader uses to reach descriptors of this kind, if any.
    pub fn range_type(self) -> Option<DescriptorRangeType> {
        match self {
            Self::Cbv => Some(DescriptorRangeType::Cbv),
            Self::Srv => Some(DescriptorRangeType::Srv),
            Self::Uav => Some(DescriptorRangeType::Uav),
            Self::None | Self::Rtv => None,
        }
    }
}

/// Type of a descriptor heap.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorHeapType {
    /// Shader visible heap of constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    /// CPU-only heap of render target views.
    Rtv,
}

impl DescriptorHeapType {
    /// Returns true if views of the given kind may be written into this heap.
    pub fn accepts(self, kind: DescriptorKind) -> bool {
        match (self, kind) {
            (Self::CbvSrvUav, DescriptorKind::Cbv | DescriptorKind::Srv | DescriptorKind::Uav) => {
                true
            }
            (Self::Rtv, DescriptorKind::Rtv) => true,
            _ => false,
        }
    }
}

/// Number of descriptors covered by a table range.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorCount {
    /// A fixed number of descriptors.
    Bounded(u32),
    /// Everything from the start of the range until the end of the heap.
    Unbounded,
}

impl DescriptorCount {
    /// Interprets a raw count, where [`UNBOUNDED_DESCRIPTOR_COUNT`] is the unbounded sentinel.
    pub fn from_raw(raw: u32) -> Self {
        if raw == UNBOUNDED_DESCRIPTOR_COUNT {
            Self::Unbounded
        } else {
            Self::Bounded(raw)
        }
    }

    /// Raw count, with [`UNBOUNDED_DESCRIPTOR_COUNT`] standing for unbounded.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Bounded(count) => count,
            Self::Unbounded => UNBOUNDED_DESCRIPTOR_COUNT,
        }
    }

    /// Returns true for [`DescriptorCount::Unbounded`].
    pub fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// The fixed count, if any.
    pub fn bounded(self) -> Option<u32> {
        match self {
            Self::Bounded(count) => Some(count),
            Self::Unbounded => None,
        }
    }
}

impl From<u32> for DescriptorCount {
    fn from(raw: u32) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for DescriptorCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Bounded(count) => write!(f, "{count}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// A shader-visible register, e.g. `register(t10, space1)`.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegisterBinding {
    /// Type of the register.
    pub range_type: DescriptorRangeType,
    /// Register space.
    pub space: RegisterSpace,
    /// Register index.
    pub register: ShaderRegister,
}

impl fmt::Display for RegisterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}, space{}",
            self.range_type.register_prefix(),
            self.register,
            self.space
        )
    }
}

/// How an array index reaching the resolver was produced in the shader.
///
/// The resolution arithmetic is identical for all of them.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IndexSource {
    /// A literal in the shader source.
    #[default]
    Constant,
    /// A value loaded from a constant buffer, identical for every invocation.
    Uniform,
    /// A per-invocation value wrapped in `NonUniformResourceIndex`.
    NonUniform,
}

/// Texel formats understood by the binding model.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureFormat {
    /// `DXGI_FORMAT_R8G8B8A8_UNORM`
    Rgba8Unorm,
    /// `DXGI_FORMAT_R8G8B8A8_UNORM_SRGB`
    Rgba8UnormSrgb,
    /// `DXGI_FORMAT_B8G8R8A8_UNORM`
    Bgra8Unorm,
    /// `DXGI_FORMAT_R32_FLOAT`
    R32Float,
    /// `DXGI_FORMAT_R32_UINT`
    R32Uint,
    /// `DXGI_FORMAT_R32G32B32A32_FLOAT`
    Rgba32Float,
}

impl TextureFormat {
    /// Size in bytes of a single texel.
    pub fn block_size(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm => 4,
            Self::R32Float | Self::R32Uint => 4,
            Self::Rgba32Float => 16,
        }
    }

    /// Strips the sRGB suffix, if the format has one.
    pub fn remove_srgb_suffix(self) -> Self {
        match self {
            Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            other => other,
        }
    }

    /// Returns true if a view of format `view` may reinterpret a resource of this format.
    ///
    /// Only sRGB and linear variants of the same layout may be mixed.
    pub fn is_view_compatible(self, view: Self) -> bool {
        self.remove_srgb_suffix() == view.remove_srgb_suffix()
    }
}

bitflags::bitflags! {
    /// Tracked usage state of a resource or a subresource.
    ///
    /// The empty set is `COMMON`.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
    pub struct ResourceStates: u32 {
        /// Usable by any queue, required for presentation and CPU access.
        const COMMON = 0;
        /// Bound as a vertex or constant buffer.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        /// Bound as an index buffer.
        const INDEX_BUFFER = 1 << 1;
        /// Bound as a render target.
        const RENDER_TARGET = 1 << 2;
        /// Bound for unordered access.
        const UNORDERED_ACCESS = 1 << 3;
        /// Read by a non-pixel shader stage.
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        /// Read by the pixel shader.
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        /// Destination of a copy.
        const COPY_DEST = 1 << 10;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 11;
        /// Every read-only state combined, as required for upload heaps.
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::COPY_SOURCE.bits();
    }
}

bitflags::bitflags! {
    /// Additional capabilities requested when creating a resource.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
    pub struct ResourceFlags: u32 {
        /// Render target views may be created for the resource.
        const ALLOW_RENDER_TARGET = 1 << 0;
        /// Unordered access views may be created for the resource.
        const ALLOW_UNORDERED_ACCESS = 1 << 2;
        /// Shader resource views may not be created for the resource.
        const DENY_SHADER_RESOURCE = 1 << 3;
    }
}

/// Memory pool a buffer is placed in.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryLocation {
    /// Device local memory.
    #[default]
    Default,
    /// CPU writable memory, always in `GENERIC_READ`.
    Upload,
    /// CPU readable memory, always in `COPY_DEST`.
    Readback,
}

/// Represents the sets of limits a device supports.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Limits {
    /// Number of slots in the shader visible CBV/SRV/UAV heap. Defaults to 10000.
    pub cbv_srv_uav_heap_capacity: u32,
    /// Number of slots in the CPU-only RTV heap. Defaults to 16.
    pub rtv_heap_capacity: u32,
    /// Alignment of constant buffer view offsets and sizes, a power of two. Defaults to 256.
    pub constant_buffer_alignment: BufferAddress,
    /// Size budget of a root signature in DWORDs, at most [`MAX_ROOT_SIGNATURE_DWORDS`].
    /// Defaults to 64.
    pub max_root_signature_dwords: u32,
    /// Maximum number of render targets a pipeline may write. Defaults to 8.
    pub max_render_targets: u32,
    /// Maximum width and height of a 2D texture. Defaults to 16384.
    pub max_texture_dimension_2d: u32,
    /// Maximum number of array slices of a texture. Defaults to 2048.
    pub max_texture_array_layers: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cbv_srv_uav_heap_capacity: 10_000,
            rtv_heap_capacity: 16,
            constant_buffer_alignment: CONSTANT_BUFFER_ALIGNMENT,
            max_root_signature_dwords: MAX_ROOT_SIGNATURE_DWORDS,
            max_render_targets: MAX_RENDER_TARGETS as u32,
            max_texture_dimension_2d: 16384,
            max_texture_array_layers: 2048,
        }
    }
}

impl Limits {
    /// Same as [`Limits::default`] with a different CBV/SRV/UAV heap size.
    pub fn with_heap_capacity(capacity: u32) -> Self {
        Self {
            cbv_srv_uav_heap_capacity: capacity,
            ..Self::default()
        }
    }

    /// Calls `fail_fn` with the name and value of every limit a device can't be created with.
    ///
    /// The constant buffer alignment must be a power of two, the root signature budget and
    /// render target count must not exceed [`MAX_ROOT_SIGNATURE_DWORDS`] and
    /// [`MAX_RENDER_TARGETS`].
    pub fn check_limits_with_fail_fn(&self, mut fail_fn: impl FnMut(&'static str, u64)) {
        if !self.constant_buffer_alignment.is_power_of_two() {
            fail_fn("constant_buffer_alignment", self.constant_buffer_alignment);
        }
        if self.max_root_signature_dwords > MAX_ROOT_SIGNATURE_DWORDS {
            fail_fn(
                "max_root_signature_dwords",
                self.max_root_signature_dwords as u64,
            );
        }
        if self.max_render_targets as usize > MAX_RENDER_TARGETS {
            fail_fn("max_render_targets", self.max_render_targets as u64);
        }
    }
}
