/*! Binding resolution.

Maps a shader reference `(range type, space, register, index)` through a root
signature and the root arguments bound at draw time to the descriptor a GPU
would read:

* inline parameters resolve straight to the bound buffer address,
* table ranges resolve to heap slot
  `table_base + table_offset + (register + index - base_register)`.

A slot that is out of range or was never written resolves to
[`ResolvedBinding::Empty`], which is a valid answer and not an error.
!*/

use std::sync::Arc;

use rmt::{
    BufferAddress, DescriptorCount, DescriptorIndex, DescriptorRangeType, IndexSource,
    RegisterBinding, RegisterSpace, ShaderRegister, ShaderStages, MAX_ROOT_SIGNATURE_DWORDS,
};
use thiserror::Error;

use crate::{
    binding_model::{RootIndex, RootParameter, RootSignature},
    heap::DescriptorHeap,
    id::ResourceId,
    pipeline::Pipeline,
    view::ViewDescriptor,
};

/// A value bound to a root slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootArgument {
    /// Start of a descriptor table, as an absolute heap index.
    Table { base: DescriptorIndex },
    /// Address of a root constant buffer view.
    ConstantBuffer {
        resource: ResourceId,
        offset: BufferAddress,
    },
}

impl RootArgument {
    fn expected_by(parameter: &RootParameter) -> &'static str {
        match *parameter {
            RootParameter::Inline(_) => "constant buffer address",
            RootParameter::Table(_) => "descriptor table",
        }
    }
}

/// Root arguments indexed by root slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RootArguments {
    slots: Vec<Option<RootArgument>>,
}

impl RootArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `argument` to root slot `index`.
    ///
    /// Every parameter costs at least one DWORD, so no signature has more than
    /// [`MAX_ROOT_SIGNATURE_DWORDS`] slots.
    pub fn set(&mut self, index: RootIndex, argument: RootArgument) -> Result<(), ResolveError> {
        if index >= MAX_ROOT_SIGNATURE_DWORDS {
            return Err(ResolveError::RootIndexOutOfRange {
                index,
                max: MAX_ROOT_SIGNATURE_DWORDS,
            });
        }
        let index = index as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(argument);
        Ok(())
    }

    pub fn get(&self, index: RootIndex) -> Option<RootArgument> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (RootIndex, RootArgument)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, argument)| argument.map(|argument| (index as RootIndex, argument)))
    }

    pub fn uses_tables(&self) -> bool {
        self.iter()
            .any(|(_, argument)| matches!(argument, RootArgument::Table { .. }))
    }
}

/// A shader reference to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindingQuery {
    /// Only parameters visible to one of these stages are considered.
    pub stages: ShaderStages,
    pub range_type: DescriptorRangeType,
    pub space: RegisterSpace,
    pub register: ShaderRegister,
    pub index: u32,
    /// Informational, the arithmetic does not depend on it.
    pub source: IndexSource,
}

impl BindingQuery {
    pub fn new(
        range_type: DescriptorRangeType,
        space: RegisterSpace,
        register: ShaderRegister,
        index: u32,
    ) -> Self {
        Self {
            stages: ShaderStages::ALL,
            range_type,
            space,
            register,
            index,
            source: IndexSource::Constant,
        }
    }

    pub fn stage(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }

    pub fn source(mut self, source: IndexSource) -> Self {
        self.source = source;
        self
    }

    pub fn binding(&self) -> RegisterBinding {
        RegisterBinding {
            range_type: self.range_type,
            space: self.space,
            register: self.register,
        }
    }
}

/// Why a table lookup found no descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EmptyReason {
    /// The slot exists but nothing was written to it.
    NeverWritten,
    /// The slot lies past the end of the heap or of an unbounded range.
    OutOfRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResolvedBinding {
    Inline {
        root_index: RootIndex,
        resource: ResourceId,
        offset: BufferAddress,
    },
    Descriptor {
        root_index: RootIndex,
        slot: DescriptorIndex,
        view: ViewDescriptor,
    },
    Empty {
        root_index: RootIndex,
        /// Saturates at `u32::MAX` for slots past the addressable range.
        slot: DescriptorIndex,
        reason: EmptyReason,
    },
}

impl ResolvedBinding {
    pub fn root_index(&self) -> RootIndex {
        match *self {
            Self::Inline { root_index, .. }
            | Self::Descriptor { root_index, .. }
            | Self::Empty { root_index, .. } => root_index,
        }
    }

    /// The heap slot, for table resolutions.
    pub fn slot(&self) -> Option<DescriptorIndex> {
        match *self {
            Self::Inline { .. } => None,
            Self::Descriptor { slot, .. } | Self::Empty { slot, .. } => Some(slot),
        }
    }

    pub fn resource(&self) -> Option<ResourceId> {
        match *self {
            Self::Inline { resource, .. } => Some(resource),
            Self::Descriptor { ref view, .. } => Some(view.resource),
            Self::Empty { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(*self, Self::Empty { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("Element {index} of {binding} is not covered by any root parameter")]
    UnresolvedBinding { binding: RegisterBinding, index: u32 },
    #[error("Root signature {bound:?} is not the one the pipeline was built with ({expected:?})")]
    LayoutMismatch { expected: String, bound: String },
    #[error("Root parameter {0} has no argument bound")]
    UnboundRootParameter(RootIndex),
    #[error("Root parameter {index} expects a {expected} argument")]
    ArgumentTypeMismatch {
        index: RootIndex,
        expected: &'static str,
    },
    #[error("Root parameter {0} is a descriptor table, but no descriptor heap is bound")]
    NoDescriptorHeap(RootIndex),
    #[error("Root index {index} is past the largest possible root signature of {max} parameters")]
    RootIndexOutOfRange { index: RootIndex, max: u32 },
}

/// Resolve `query` against a validated signature and its bound arguments.
pub fn resolve(
    signature: &RootSignature,
    arguments: &RootArguments,
    heap: Option<&DescriptorHeap>,
    query: &BindingQuery,
) -> Result<ResolvedBinding, ResolveError> {
    let unresolved = || ResolveError::UnresolvedBinding {
        binding: query.binding(),
        index: query.index,
    };
    let absolute = query.register as u64 + query.index as u64;
    let (root_index, parameter) = signature
        .find_parameter(query.stages, query.range_type, query.space, absolute)
        .ok_or_else(unresolved)?;
    let argument = arguments
        .get(root_index)
        .ok_or(ResolveError::UnboundRootParameter(root_index))?;

    match (*parameter, argument) {
        (RootParameter::Inline(_), RootArgument::ConstantBuffer { resource, offset }) => {
            // only the declared register itself, there is no array behind a root descriptor
            if query.index != 0 {
                return Err(unresolved());
            }
            Ok(ResolvedBinding::Inline {
                root_index,
                resource,
                offset,
            })
        }
        (RootParameter::Table(table), RootArgument::Table { base }) => {
            let heap = heap.ok_or(ResolveError::NoDescriptorHeap(root_index))?;
            let capacity = heap.capacity() as u64;
            let offset_in_range = absolute - table.base_register as u64;
            let slot = base as u64 + table.table_offset as u64 + offset_in_range;
            let clamped = DescriptorIndex::try_from(slot).unwrap_or(DescriptorIndex::MAX);
            let past_range = match table.count {
                DescriptorCount::Unbounded => {
                    offset_in_range >= capacity.saturating_sub(table.table_offset as u64)
                }
                DescriptorCount::Bounded(_) => false,
            };
            if past_range || slot >= capacity {
                log::trace!(
                    "{} element {} lands on slot {} past the {}-slot heap",
                    query.binding(),
                    query.index,
                    slot,
                    capacity
                );
                return Ok(ResolvedBinding::Empty {
                    root_index,
                    slot: clamped,
                    reason: EmptyReason::OutOfRange,
                });
            }
            Ok(match heap.view(clamped) {
                Some(view) => ResolvedBinding::Descriptor {
                    root_index,
                    slot: clamped,
                    view: *view,
                },
                None => ResolvedBinding::Empty {
                    root_index,
                    slot: clamped,
                    reason: EmptyReason::NeverWritten,
                },
            })
        }
        (_, _) => Err(ResolveError::ArgumentTypeMismatch {
            index: root_index,
            expected: RootArgument::expected_by(parameter),
        }),
    }
}

/// Like [`resolve`], but first checks that `signature` is the one `pipeline` was built with.
pub fn resolve_for_pipeline(
    pipeline: &Pipeline,
    signature: &Arc<RootSignature>,
    arguments: &RootArguments,
    heap: Option<&DescriptorHeap>,
    query: &BindingQuery,
) -> Result<ResolvedBinding, ResolveError> {
    if !pipeline.is_compatible(signature) {
        return Err(ResolveError::LayoutMismatch {
            expected: pipeline.root_signature().label().to_string(),
            bound: signature.label().to_string(),
        });
    }
    resolve(signature, arguments, heap, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{binding_model::RootBindingLayout, view::ViewRange};
    use rmt::{
        DescriptorHeapType, DescriptorKind,
        DescriptorRangeType::{Cbv, Srv},
        Limits, TextureFormat, UNBOUNDED_DESCRIPTOR_COUNT,
    };

    fn texture_view(resource: ResourceId) -> ViewDescriptor {
        ViewDescriptor {
            resource,
            kind: DescriptorKind::Srv,
            range: ViewRange::Texture {
                format: TextureFormat::R32Float,
                base_mip: 0,
                mip_count: 1,
                first_slice: 0,
                slice_count: 4,
            },
        }
    }

    fn table_args(count: RootIndex) -> RootArguments {
        let mut args = RootArguments::new();
        for index in 0..count {
            args.set(index, RootArgument::Table { base: 0 }).unwrap();
        }
        args
    }

    #[test]
    fn offset_arithmetic_ignores_index_source() {
        let signature = RootBindingLayout::new()
            .table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 50)
            .freeze(&Limits::with_heap_capacity(128))
            .unwrap();
        let mut heap = DescriptorHeap::new(DescriptorHeapType::CbvSrvUav, 128);
        let res1 = ResourceId::zip(1, 1);
        heap.create_slot(Some(56), texture_view(res1)).unwrap();

        for source in [IndexSource::Constant, IndexSource::Uniform, IndexSource::NonUniform] {
            let query = BindingQuery::new(Srv, 0, 6, 0).source(source);
            let resolved = resolve(&signature, &table_args(1), Some(&heap), &query).unwrap();
            assert_eq!(resolved.slot(), Some(56));
            assert_eq!(resolved.resource(), Some(res1));

            let query = BindingQuery::new(Srv, 0, 0, 6).source(source);
            let same = resolve(&signature, &table_args(1), Some(&heap), &query).unwrap();
            assert_eq!(same, resolved);
        }
    }

    #[test]
    fn table_base_is_added() {
        let signature = RootBindingLayout::new()
            .table(Srv, 0, 2, 1, 57)
            .freeze(&Limits::with_heap_capacity(128))
            .unwrap();
        let heap = DescriptorHeap::new(DescriptorHeapType::CbvSrvUav, 128);
        let mut args = RootArguments::new();
        args.set(0, RootArgument::Table { base: 10 }).unwrap();
        assert_eq!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Srv, 0, 2, 0)),
            Ok(ResolvedBinding::Empty {
                root_index: 0,
                slot: 67,
                reason: EmptyReason::NeverWritten,
            })
        );
    }

    #[test]
    fn uncovered_query() {
        let signature = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Srv, 0, 0, 1, 56)
            .freeze(&Limits::default())
            .unwrap();
        let heap = DescriptorHeap::new(DescriptorHeapType::CbvSrvUav, 10_000);
        let args = table_args(2);
        assert_eq!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Srv, 0, 1, 0)),
            Err(ResolveError::UnresolvedBinding {
                binding: RegisterBinding {
                    range_type: Srv,
                    space: 0,
                    register: 1,
                },
                index: 0,
            })
        );
        // same register number, other space
        assert!(matches!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Srv, 1, 0, 0)),
            Err(ResolveError::UnresolvedBinding { .. })
        ));
        // t0 is covered but b0 is not
        assert!(matches!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Cbv, 0, 0, 0)),
            Err(ResolveError::UnresolvedBinding { .. })
        ));
    }

    #[test]
    fn inline_parameter() {
        let signature = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .freeze(&Limits::default())
            .unwrap();
        let cb = ResourceId::zip(0, 1);
        let mut args = RootArguments::new();
        args.set(0, RootArgument::ConstantBuffer { resource: cb, offset: 0 })
            .unwrap();

        assert_eq!(
            resolve(&signature, &args, None, &BindingQuery::new(Cbv, 0, 3, 0)),
            Ok(ResolvedBinding::Inline {
                root_index: 0,
                resource: cb,
                offset: 0,
            })
        );
        assert!(matches!(
            resolve(&signature, &args, None, &BindingQuery::new(Cbv, 0, 3, 1)),
            Err(ResolveError::UnresolvedBinding { index: 1, .. })
        ));
    }

    #[test]
    fn argument_errors() {
        let signature = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Srv, 0, 0, 1, 0)
            .freeze(&Limits::default())
            .unwrap();
        let heap = DescriptorHeap::new(DescriptorHeapType::CbvSrvUav, 16);
        let query = BindingQuery::new(Srv, 0, 0, 0);

        assert_eq!(
            resolve(&signature, &RootArguments::new(), Some(&heap), &query),
            Err(ResolveError::UnboundRootParameter(1))
        );
        let args = table_args(2);
        assert_eq!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Cbv, 0, 3, 0)),
            Err(ResolveError::ArgumentTypeMismatch {
                index: 0,
                expected: "constant buffer address",
            })
        );
        assert_eq!(
            resolve(&signature, &args, None, &query),
            Err(ResolveError::NoDescriptorHeap(1))
        );
    }

    #[test]
    fn unbounded_range_ends_at_heap_capacity() {
        let capacity = 10_000;
        let signature = RootBindingLayout::new()
            .table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 30)
            .freeze(&Limits::with_heap_capacity(capacity))
            .unwrap();
        let mut heap = DescriptorHeap::new(DescriptorHeapType::CbvSrvUav, capacity);
        let alias = ResourceId::zip(7, 1);
        for slot in 1024..capacity {
            heap.create_slot(Some(slot), texture_view(alias)).unwrap();
        }
        let args = table_args(1);

        let last = resolve(&signature, &args, Some(&heap), &BindingQuery::new(Srv, 0, 0, 9_969))
            .unwrap();
        assert_eq!(last.slot(), Some(9_999));
        assert_eq!(last.resource(), Some(alias));

        assert_eq!(
            resolve(&signature, &args, Some(&heap), &BindingQuery::new(Srv, 0, 0, 9_970)),
            Ok(ResolvedBinding::Empty {
                root_index: 0,
                slot: 10_000,
                reason: EmptyReason::OutOfRange,
            })
        );
        let far = resolve(
            &signature,
            &args,
            Some(&heap),
            &BindingQuery::new(Srv, 0, 0, u32::MAX),
        )
        .unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn pipeline_signature_mismatch() {
        use crate::pipeline::{PipelineDescriptor, ShaderInterface};

        let limits = Limits::default();
        let built = Arc::new(
            RootBindingLayout::with_label("built")
                .inline_cbv(0, 3)
                .freeze(&limits)
                .unwrap(),
        );
        let other = Arc::new(
            RootBindingLayout::with_label("other")
                .inline_cbv(0, 3)
                .freeze(&limits)
                .unwrap(),
        );
        let pipeline = Pipeline::new(
            &PipelineDescriptor {
                label: None,
                root_signature: Arc::clone(&built),
                vertex: ShaderInterface::new(),
                pixel: None,
                render_targets: &[],
            },
            &limits,
        )
        .unwrap();

        let mut args = RootArguments::new();
        args.set(
            0,
            RootArgument::ConstantBuffer {
                resource: ResourceId::zip(0, 1),
                offset: 0,
            },
        )
        .unwrap();
        let query = BindingQuery::new(Cbv, 0, 3, 0);
        assert!(resolve_for_pipeline(&pipeline, &built, &args, None, &query).is_ok());
        assert_eq!(
            resolve_for_pipeline(&pipeline, &other, &args, None, &query),
            Err(ResolveError::LayoutMismatch {
                expected: "built".to_string(),
                bound: "other".to_string(),
            })
        );
    }

    #[test]
    fn root_arguments_stop_at_the_root_budget() {
        let mut args = RootArguments::new();
        args.set(63, RootArgument::Table { base: 0 }).unwrap();
        assert_eq!(
            args.set(u32::MAX, RootArgument::Table { base: 0 }),
            Err(ResolveError::RootIndexOutOfRange {
                index: u32::MAX,
                max: 64,
            })
        );
        assert_eq!(
            args.iter().collect::<Vec<_>>(),
            [(63, RootArgument::Table { base: 0 })]
        );
    }
}
