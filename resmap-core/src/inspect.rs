/*! Draw inspection.

Turns a recorded [`DrawCall`] into the binding report a debugger displays:
every element of every declared binding, and every indexed access with the
indices it evaluates to, resolved down to a heap slot and a resource.
!*/

use rmt::{
    BufferAddress, DescriptorCount, DescriptorIndex, DescriptorKind, DescriptorRangeType,
    IndexSource, RegisterBinding, RegisterSpace, ShaderRegister, ShaderStages, TextureFormat,
};
use smallvec::SmallVec;

use crate::{
    binding_model::{RootIndex, RootParameter},
    command::DrawCall,
    device::Device,
    error::{Classify, ErrorKind},
    pipeline::{IndexExpr, ShaderBinding, StageInterface},
    resolve::{
        resolve_for_pipeline, BindingQuery, EmptyReason, ResolveError, ResolvedBinding,
        RootArgument,
    },
    view::ViewRange,
};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mapping {
    Inline {
        root_index: RootIndex,
        resource: String,
        offset: BufferAddress,
    },
    Descriptor {
        root_index: RootIndex,
        slot: DescriptorIndex,
        kind: DescriptorKind,
        resource: String,
        range: ViewRange,
    },
    Empty {
        root_index: RootIndex,
        slot: DescriptorIndex,
        reason: EmptyReason,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Mapping {
    pub fn slot(&self) -> Option<DescriptorIndex> {
        match *self {
            Self::Descriptor { slot, .. } | Self::Empty { slot, .. } => Some(slot),
            Self::Inline { .. } | Self::Error { .. } => None,
        }
    }

    pub fn resource(&self) -> Option<&str> {
        match *self {
            Self::Inline { ref resource, .. } | Self::Descriptor { ref resource, .. } => {
                Some(resource)
            }
            Self::Empty { .. } | Self::Error { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementReport {
    pub index: u32,
    pub mapping: Mapping,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindingReport {
    pub name: String,
    pub binding: RegisterBinding,
    pub count: DescriptorCount,
    /// For unbounded bindings, only elements landing on written slots.
    pub elements: Vec<ElementReport>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessReport {
    pub binding: String,
    pub source: IndexSource,
    pub indices: SmallVec<[u32; 4]>,
    pub elements: Vec<ElementReport>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageReport {
    pub stage: ShaderStages,
    pub bindings: Vec<BindingReport>,
    pub accesses: Vec<AccessReport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RenderTargetReport {
    pub slot: DescriptorIndex,
    pub resource: Option<String>,
    pub format: Option<TextureFormat>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DrawReport {
    pub marker: Option<String>,
    pub pipeline: String,
    pub root_signature: String,
    pub render_targets: Vec<RenderTargetReport>,
    pub stages: Vec<StageReport>,
}

impl DrawReport {
    pub fn stage(&self, stage: ShaderStages) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

impl StageReport {
    pub fn binding(&self, name: &str) -> Option<&BindingReport> {
        self.bindings.iter().find(|report| report.name == name)
    }

    pub fn accesses_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a AccessReport> + 'a {
        self.accesses.iter().filter(move |report| report.binding == name)
    }
}

type Resolution = (u32, Result<ResolvedBinding, ResolveError>);

struct Inspector<'a> {
    device: &'a Device,
    draw: &'a DrawCall,
}

impl<'a> Inspector<'a> {
    fn query(
        &self,
        stage: ShaderStages,
        binding: &ShaderBinding,
        index: u32,
        source: IndexSource,
    ) -> BindingQuery {
        BindingQuery::new(binding.range_type, binding.space, binding.register, index)
            .stage(stage)
            .source(source)
    }

    /// Resolves `indices` while the view heap is locked.
    ///
    /// The lock is released before any resource is looked up.
    fn resolve_indices(
        &self,
        stage: ShaderStages,
        binding: &ShaderBinding,
        indices: &[u32],
        source: IndexSource,
    ) -> Vec<Resolution> {
        let heap = self.device.views();
        let bound_heap = self.draw.descriptor_heap.map(|_| &*heap);
        indices
            .iter()
            .map(|&index| {
                let query = self.query(stage, binding, index, source);
                let result = resolve_for_pipeline(
                    &self.draw.pipeline,
                    &self.draw.root_signature,
                    &self.draw.arguments,
                    bound_heap,
                    &query,
                );
                (index, result)
            })
            .collect()
    }

    /// Array indices of an unbounded binding that land on written slots.
    fn unbounded_indices(
        &self,
        stage: ShaderStages,
        binding: &ShaderBinding,
    ) -> Result<Vec<u32>, ResolveError> {
        let signature = &self.draw.root_signature;
        let (root_index, parameter) = signature
            .find_parameter(
                stage,
                binding.range_type,
                binding.space,
                binding.register as u64,
            )
            .ok_or(ResolveError::UnresolvedBinding {
                binding: binding.register_binding(),
                index: 0,
            })?;
        let table = match *parameter {
            RootParameter::Table(table) => table,
            RootParameter::Inline(_) => return Ok(vec![0]),
        };
        let base = match self.draw.arguments.get(root_index) {
            Some(RootArgument::Table { base }) => base,
            Some(RootArgument::ConstantBuffer { .. }) => {
                return Err(ResolveError::ArgumentTypeMismatch {
                    index: root_index,
                    expected: "descriptor table",
                })
            }
            None => return Err(ResolveError::UnboundRootParameter(root_index)),
        };
        if self.draw.descriptor_heap.is_none() {
            return Err(ResolveError::NoDescriptorHeap(root_index));
        }

        let start = base as u64
            + table.table_offset as u64
            + (binding.register - table.base_register) as u64;
        let heap = self.device.views();
        let start = match DescriptorIndex::try_from(start) {
            Ok(start) => start,
            Err(_) => return Ok(Vec::new()),
        };
        let limit = match table.count {
            DescriptorCount::Bounded(count) => count as u64,
            DescriptorCount::Unbounded => u64::MAX,
        };
        Ok(heap
            .iter_occupied_from(start)
            .map(|(slot, _)| (slot - start) as u64)
            .take_while(|&index| index < limit)
            .map(|index| index as u32)
            .collect())
    }

    fn element(&self, (index, result): Resolution) -> ElementReport {
        let mapping = match result {
            Ok(ResolvedBinding::Inline {
                root_index,
                resource,
                offset,
            }) => Mapping::Inline {
                root_index,
                resource: self.device.resource_label(resource),
                offset,
            },
            Ok(ResolvedBinding::Descriptor {
                root_index,
                slot,
                view,
            }) => Mapping::Descriptor {
                root_index,
                slot,
                kind: view.kind,
                resource: self.device.resource_label(view.resource),
                range: view.range,
            },
            Ok(ResolvedBinding::Empty {
                root_index,
                slot,
                reason,
            }) => Mapping::Empty {
                root_index,
                slot,
                reason,
            },
            Err(err) => Mapping::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        ElementReport { index, mapping }
    }

    fn binding(&self, stage: ShaderStages, binding: &ShaderBinding) -> BindingReport {
        let (indices, error) = match binding.count {
            DescriptorCount::Bounded(count) => ((0..count).collect(), None),
            DescriptorCount::Unbounded => match self.unbounded_indices(stage, binding) {
                Ok(indices) => (indices, None),
                Err(err) => (Vec::new(), Some(err.to_string())),
            },
        };
        let elements = self
            .resolve_indices(stage, binding, &indices, IndexSource::Constant)
            .into_iter()
            .map(|resolution| self.element(resolution))
            .collect();
        BindingReport {
            name: binding.name.clone(),
            binding: binding.register_binding(),
            count: binding.count,
            elements,
            error,
        }
    }

    /// Reads the `uint` an index is loaded from.
    fn uniform_index(
        &self,
        stage: ShaderStages,
        space: RegisterSpace,
        register: ShaderRegister,
        component: u32,
    ) -> Result<u32, String> {
        let cbuffer = ShaderBinding {
            name: String::new(),
            range_type: DescriptorRangeType::Cbv,
            space,
            register,
            count: DescriptorCount::Bounded(1),
        };
        let resolutions = self.resolve_indices(stage, &cbuffer, &[0], IndexSource::Constant);
        let (_, result) = resolutions
            .into_iter()
            .next()
            .ok_or_else(|| "no resolution".to_string())?;
        let (resource, offset) = match result.map_err(|err| err.to_string())? {
            ResolvedBinding::Inline {
                resource, offset, ..
            } => (resource, offset),
            ResolvedBinding::Descriptor { view, .. } => match view.range {
                ViewRange::Bytes { offset, .. } => (view.resource, offset),
                other => return Err(format!("b{register} is bound to {other:?}")),
            },
            ResolvedBinding::Empty { slot, .. } => {
                return Err(format!("b{register} resolves to empty slot {slot}"))
            }
        };
        let address = (component as BufferAddress)
            .checked_mul(4)
            .and_then(|component_offset| offset.checked_add(component_offset))
            .ok_or_else(|| {
                format!("component {component} of b{register} overflows offset {offset}")
            })?;
        let bytes = self
            .device
            .read_buffer(resource, address, 4)
            .map_err(|err| err.to_string())?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(word))
    }

    fn stage(&self, stage: &StageInterface) -> StageReport {
        let interface = &stage.interface;
        let bindings = interface
            .bindings
            .iter()
            .map(|binding| self.binding(stage.stage, binding))
            .collect();

        let mut accesses = Vec::with_capacity(interface.accesses.len());
        for access in interface.accesses.iter() {
            let source = access.index.source();
            let indices: Result<SmallVec<[u32; 4]>, String> = match access.index {
                IndexExpr::Constant(index) => Ok(SmallVec::from_slice(&[index])),
                IndexExpr::Uniform {
                    space,
                    register,
                    component,
                } => self
                    .uniform_index(stage.stage, space, register, component)
                    .map(|index| SmallVec::from_slice(&[index])),
                IndexExpr::NonUniform(ref lanes) => Ok(SmallVec::from_slice(lanes)),
            };
            let report = match (indices, interface.find(&access.binding)) {
                (Ok(indices), Some(binding)) => AccessReport {
                    binding: access.binding.clone(),
                    source,
                    elements: self
                        .resolve_indices(stage.stage, binding, &indices, source)
                        .into_iter()
                        .map(|resolution| self.element(resolution))
                        .collect(),
                    indices,
                    error: None,
                },
                (Ok(indices), None) => AccessReport {
                    binding: access.binding.clone(),
                    source,
                    indices,
                    elements: Vec::new(),
                    error: Some(format!("`{}` is not declared", access.binding)),
                },
                (Err(err), _) => AccessReport {
                    binding: access.binding.clone(),
                    source,
                    indices: SmallVec::new(),
                    elements: Vec::new(),
                    error: Some(err),
                },
            };
            accesses.push(report);
        }

        StageReport {
            stage: stage.stage,
            bindings,
            accesses,
        }
    }

    fn render_targets(&self) -> Vec<RenderTargetReport> {
        let views = {
            let heap = self.device.render_targets();
            self.draw
                .render_targets
                .iter()
                .map(|&slot| (slot, heap.view(slot).copied()))
                .collect::<Vec<_>>()
        };
        views
            .into_iter()
            .map(|(slot, view)| RenderTargetReport {
                slot,
                resource: view.map(|view| self.device.resource_label(view.resource)),
                format: view.and_then(|view| match view.range {
                    ViewRange::Texture { format, .. } => Some(format),
                    _ => None,
                }),
            })
            .collect()
    }
}

/// Resolve everything `draw` can reach through its root arguments.
pub fn inspect_draw(device: &Device, draw: &DrawCall) -> DrawReport {
    let inspector = Inspector { device, draw };
    log::debug!(
        "Inspecting draw {:?} of pipeline '{}'",
        draw.marker,
        draw.pipeline.label()
    );
    DrawReport {
        marker: draw.marker.clone(),
        pipeline: draw.pipeline.label().to_string(),
        root_signature: draw.root_signature.label().to_string(),
        render_targets: inspector.render_targets(),
        stages: draw
            .pipeline
            .stages()
            .iter()
            .map(|stage| inspector.stage(stage))
            .collect(),
    }
}
