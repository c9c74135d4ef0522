use std::sync::Arc;

use arrayvec::ArrayVec;
use rmt::{
    DescriptorCount, DescriptorRangeType, IndexSource, Limits, RegisterBinding, RegisterSpace,
    ShaderRegister, ShaderStages, TextureFormat, MAX_RENDER_TARGETS,
};
use thiserror::Error;

use crate::{
    binding_model::{LayoutError, RootSignature},
    FastHashMap, Label,
};

/// A resource a shader declares, e.g. `Texture2DArray resArray[4] : register(t10, space1)`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderBinding {
    pub name: String,
    pub range_type: DescriptorRangeType,
    pub space: RegisterSpace,
    pub register: ShaderRegister,
    /// One for a plain resource.
    pub count: DescriptorCount,
}

impl ShaderBinding {
    pub fn register_binding(&self) -> RegisterBinding {
        RegisterBinding {
            range_type: self.range_type,
            space: self.space,
            register: self.register,
        }
    }
}

/// How a shader computes the array index of an access.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexExpr {
    Constant(u32),
    /// A `uint` component of a constant buffer the shader declares.
    Uniform {
        space: RegisterSpace,
        register: ShaderRegister,
        component: u32,
    },
    /// Per-invocation values, one per lane of interest.
    NonUniform(Vec<u32>),
}

impl IndexExpr {
    pub fn source(&self) -> IndexSource {
        match *self {
            Self::Constant(_) => IndexSource::Constant,
            Self::Uniform { .. } => IndexSource::Uniform,
            Self::NonUniform(_) => IndexSource::NonUniform,
        }
    }
}

/// An indexed use of a declared binding, e.g. `resArray[NonUniformResourceIndex(i)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderAccess {
    pub binding: String,
    pub index: IndexExpr,
}

/// What reflection reports about one compiled shader stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderInterface {
    pub bindings: Vec<ShaderBinding>,
    pub accesses: Vec<ShaderAccess>,
}

impl ShaderInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a binding; `count` of [`rmt::UNBOUNDED_DESCRIPTOR_COUNT`] makes it unbounded.
    pub fn binding(
        mut self,
        name: &str,
        range_type: DescriptorRangeType,
        space: RegisterSpace,
        register: ShaderRegister,
        count: u32,
    ) -> Self {
        self.bindings.push(ShaderBinding {
            name: name.to_string(),
            range_type,
            space,
            register,
            count: DescriptorCount::from_raw(count),
        });
        self
    }

    pub fn access(mut self, binding: &str, index: IndexExpr) -> Self {
        self.accesses.push(ShaderAccess {
            binding: binding.to_string(),
            index,
        });
        self
    }

    pub fn find(&self, name: &str) -> Option<&ShaderBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    /// The constant buffer declared at `register` of `space`, if any.
    pub fn find_cbuffer(
        &self,
        space: RegisterSpace,
        register: ShaderRegister,
    ) -> Option<&ShaderBinding> {
        self.bindings.iter().find(|binding| {
            binding.range_type == DescriptorRangeType::Cbv
                && binding.space == space
                && binding.register == register
        })
    }

    fn validate(&self, stage: ShaderStages) -> Result<(), CreatePipelineError> {
        let mut names = FastHashMap::default();
        for binding in self.bindings.iter() {
            if names.insert(binding.name.as_str(), binding).is_some() {
                return Err(CreatePipelineError::DuplicateBinding {
                    stage,
                    name: binding.name.clone(),
                });
            }
        }
        for access in self.accesses.iter() {
            let binding = names.get(access.binding.as_str()).ok_or_else(|| {
                CreatePipelineError::UnknownBinding {
                    stage,
                    name: access.binding.clone(),
                }
            })?;
            match access.index {
                IndexExpr::Constant(index) => {
                    if let DescriptorCount::Bounded(count) = binding.count {
                        if index >= count {
                            return Err(CreatePipelineError::AccessOutOfBounds {
                                stage,
                                name: access.binding.clone(),
                                index,
                                count,
                            });
                        }
                    }
                }
                IndexExpr::Uniform {
                    space, register, ..
                } => {
                    if self.find_cbuffer(space, register).is_none() {
                        return Err(CreatePipelineError::UnknownIndexSource {
                            stage,
                            name: access.binding.clone(),
                            space,
                            register,
                        });
                    }
                }
                IndexExpr::NonUniform(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PipelineDescriptor<'a> {
    pub label: Label<'a>,
    pub root_signature: Arc<RootSignature>,
    pub vertex: ShaderInterface,
    pub pixel: Option<ShaderInterface>,
    pub render_targets: &'a [TextureFormat],
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CreatePipelineError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{count} render targets requested, at most {max} are supported")]
    TooManyRenderTargets { count: usize, max: u32 },
    #[error("Binding `{name}` is declared twice in the {stage:?} stage")]
    DuplicateBinding { stage: ShaderStages, name: String },
    #[error("The {stage:?} stage accesses `{name}`, which it doesn't declare")]
    UnknownBinding { stage: ShaderStages, name: String },
    #[error("The {stage:?} stage reads element {index} of `{name}`, which has {count}")]
    AccessOutOfBounds {
        stage: ShaderStages,
        name: String,
        index: u32,
        count: u32,
    },
    #[error("The index of `{name}` in the {stage:?} stage comes from b{register}, space{space}, which is not declared")]
    UnknownIndexSource {
        stage: ShaderStages,
        name: String,
        space: RegisterSpace,
        register: ShaderRegister,
    },
}

#[derive(Clone, Debug)]
pub struct StageInterface {
    pub stage: ShaderStages,
    pub interface: ShaderInterface,
}

/// A graphics pipeline, tied to the root signature it was built against.
#[derive(Debug)]
pub struct Pipeline {
    label: String,
    root_signature: Arc<RootSignature>,
    stages: ArrayVec<StageInterface, 2>,
    render_targets: ArrayVec<TextureFormat, MAX_RENDER_TARGETS>,
}

impl Pipeline {
    pub(crate) fn new(desc: &PipelineDescriptor, limits: &Limits) -> Result<Self, CreatePipelineError> {
        let max = limits.max_render_targets.min(MAX_RENDER_TARGETS as u32);
        if desc.render_targets.len() > max as usize {
            return Err(CreatePipelineError::TooManyRenderTargets {
                count: desc.render_targets.len(),
                max,
            });
        }

        let mut stages = ArrayVec::new();
        stages.push(StageInterface {
            stage: ShaderStages::VERTEX,
            interface: desc.vertex.clone(),
        });
        if let Some(ref pixel) = desc.pixel {
            stages.push(StageInterface {
                stage: ShaderStages::PIXEL,
                interface: pixel.clone(),
            });
        }
        for stage in stages.iter() {
            stage.interface.validate(stage.stage)?;
            desc.root_signature
                .validate_coverage(stage.stage, &stage.interface)?;
        }

        Ok(Self {
            label: desc.label.as_deref().unwrap_or_default().to_string(),
            root_signature: Arc::clone(&desc.root_signature),
            stages,
            render_targets: desc.render_targets.iter().copied().collect(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    pub fn stages(&self) -> &[StageInterface] {
        &self.stages
    }

    pub fn render_targets(&self) -> &[TextureFormat] {
        &self.render_targets
    }

    /// Returns true if `signature` is the one this pipeline was built against.
    pub fn is_compatible(&self, signature: &Arc<RootSignature>) -> bool {
        Arc::ptr_eq(&self.root_signature, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_model::RootBindingLayout;
    use rmt::DescriptorRangeType::{Cbv, Srv};

    fn signature() -> Arc<RootSignature> {
        let layout = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Srv, 1, 10, 4, 30);
        Arc::new(layout.freeze(&Limits::default()).unwrap())
    }

    fn descriptor<'a>(pixel: ShaderInterface, targets: &'a [TextureFormat]) -> PipelineDescriptor<'a> {
        PipelineDescriptor {
            label: None,
            root_signature: signature(),
            vertex: ShaderInterface::new(),
            pixel: Some(pixel),
            render_targets: targets,
        }
    }

    #[test]
    fn res_array_pipeline() {
        let pixel = ShaderInterface::new()
            .binding("test", Cbv, 0, 3, 1)
            .binding("resArray", Srv, 1, 10, 4)
            .access("resArray", IndexExpr::Constant(1))
            .access(
                "resArray",
                IndexExpr::Uniform {
                    space: 0,
                    register: 3,
                    component: 0,
                },
            )
            .access("resArray", IndexExpr::NonUniform(vec![0, 1, 2, 3]));
        let pipeline =
            Pipeline::new(&descriptor(pixel, &[TextureFormat::Rgba32Float]), &Limits::default())
                .unwrap();
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.render_targets(), &[TextureFormat::Rgba32Float]);
    }

    #[test]
    fn coverage_gap_fails_the_build() {
        let pixel = ShaderInterface::new().binding("res1", Srv, 0, 0, 1);
        assert!(matches!(
            Pipeline::new(&descriptor(pixel, &[]), &Limits::default()),
            Err(CreatePipelineError::Layout(LayoutError::RegisterGap { .. }))
        ));
    }

    #[test]
    fn access_validation() {
        let constant = ShaderInterface::new()
            .binding("resArray", Srv, 1, 10, 4)
            .access("resArray", IndexExpr::Constant(4));
        assert!(matches!(
            Pipeline::new(&descriptor(constant, &[]), &Limits::default()),
            Err(CreatePipelineError::AccessOutOfBounds { index: 4, count: 4, .. })
        ));

        let uniform = ShaderInterface::new()
            .binding("resArray", Srv, 1, 10, 4)
            .access(
                "resArray",
                IndexExpr::Uniform {
                    space: 0,
                    register: 3,
                    component: 0,
                },
            );
        assert!(matches!(
            Pipeline::new(&descriptor(uniform, &[]), &Limits::default()),
            Err(CreatePipelineError::UnknownIndexSource { register: 3, .. })
        ));

        let unknown = ShaderInterface::new().access("missing", IndexExpr::Constant(0));
        assert!(matches!(
            Pipeline::new(&descriptor(unknown, &[]), &Limits::default()),
            Err(CreatePipelineError::UnknownBinding { .. })
        ));
    }

    #[test]
    fn too_many_render_targets() {
        let targets = [TextureFormat::Rgba8Unorm; 9];
        assert_eq!(
            Pipeline::new(&descriptor(ShaderInterface::new(), &targets), &Limits::default())
                .map(|_| ()),
            Err(CreatePipelineError::TooManyRenderTargets { count: 9, max: 8 })
        );
    }
}
