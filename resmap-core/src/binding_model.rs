use std::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

use rmt::{
    DescriptorCount, DescriptorIndex, DescriptorRangeType, Limits, RegisterBinding,
    RegisterSpace, ShaderRegister, ShaderStages, ROOT_DESCRIPTOR_DWORDS, ROOT_TABLE_DWORDS,
};
use thiserror::Error;

use crate::pipeline::ShaderInterface;

/// Position of a parameter in a root signature.
pub type RootIndex = u32;

/// A root descriptor, bound by address at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InlineDescriptor {
    pub visibility: ShaderStages,
    pub range_type: DescriptorRangeType,
    pub space: RegisterSpace,
    pub register: ShaderRegister,
}

/// A descriptor table holding a single range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableRange {
    pub visibility: ShaderStages,
    pub range_type: DescriptorRangeType,
    pub space: RegisterSpace,
    pub base_register: ShaderRegister,
    pub count: DescriptorCount,
    /// Offset of the range from the table start, in descriptors.
    pub table_offset: DescriptorIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootParameter {
    Inline(InlineDescriptor),
    Table(TableRange),
}

impl RootParameter {
    pub fn visibility(&self) -> ShaderStages {
        match *self {
            Self::Inline(ref inline) => inline.visibility,
            Self::Table(ref table) => table.visibility,
        }
    }

    pub fn range_type(&self) -> DescriptorRangeType {
        match *self {
            Self::Inline(ref inline) => inline.range_type,
            Self::Table(ref table) => table.range_type,
        }
    }

    pub fn space(&self) -> RegisterSpace {
        match *self {
            Self::Inline(ref inline) => inline.space,
            Self::Table(ref table) => table.space,
        }
    }

    pub fn base_register(&self) -> ShaderRegister {
        match *self {
            Self::Inline(ref inline) => inline.register,
            Self::Table(ref table) => table.base_register,
        }
    }

    /// Registers covered by the parameter, widened so an unbounded range
    /// ends past `u32::MAX`.
    pub fn registers(&self) -> Range<u64> {
        let start = self.base_register() as u64;
        match *self {
            Self::Inline(_) => start..start + 1,
            Self::Table(ref table) => match table.count {
                DescriptorCount::Bounded(count) => start..start + count as u64,
                DescriptorCount::Unbounded => start..ShaderRegister::MAX as u64 + 1,
            },
        }
    }

    pub fn dword_cost(&self) -> u32 {
        match *self {
            Self::Inline(_) => ROOT_DESCRIPTOR_DWORDS,
            Self::Table(_) => ROOT_TABLE_DWORDS,
        }
    }

    fn aliases(&self, other: &Self) -> bool {
        self.range_type() == other.range_type()
            && self.space() == other.space()
            && self.visibility().intersects(other.visibility())
    }

    fn covers(
        &self,
        stage: ShaderStages,
        range_type: DescriptorRangeType,
        space: RegisterSpace,
        register: u64,
    ) -> bool {
        self.range_type() == range_type
            && self.space() == space
            && self.visibility().intersects(stage)
            && self.registers().contains(&register)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum LayoutError {
    #[error("Root parameter {index} overlaps root parameter {other} in {range_type:?} register space {space}")]
    OverlappingRange {
        index: RootIndex,
        other: RootIndex,
        range_type: DescriptorRangeType,
        space: RegisterSpace,
    },
    #[error("Root parameter {index} reaches descriptor {end} of a heap holding {capacity}")]
    CapacityExceeded {
        index: RootIndex,
        end: u64,
        capacity: DescriptorIndex,
    },
    #[error("Root signature costs {cost} DWORDs, the limit is {limit}")]
    TooManyParameters { cost: u32, limit: u32 },
    #[error("Root parameter {index} declares an empty descriptor range")]
    ZeroCount { index: RootIndex },
    #[error("Root parameter {index} runs past the last register of its space")]
    RegisterOverflow { index: RootIndex },
    #[error("Element {element} of `{name}` ({binding}) is not covered by any root parameter visible to {stage:?}")]
    RegisterGap {
        name: String,
        binding: RegisterBinding,
        element: u32,
        stage: ShaderStages,
    },
}

/// Finds the parameter covering `register` of `range_type` in `space`.
///
/// After validation at most one parameter can match.
fn find_parameter(
    parameters: &[RootParameter],
    stage: ShaderStages,
    range_type: DescriptorRangeType,
    space: RegisterSpace,
    register: u64,
) -> Option<(RootIndex, &RootParameter)> {
    parameters
        .iter()
        .enumerate()
        .find(|(_, param)| param.covers(stage, range_type, space, register))
        .map(|(index, param)| (index as RootIndex, param))
}

fn check_coverage(
    parameters: &[RootParameter],
    stage: ShaderStages,
    shader: &ShaderInterface,
) -> Result<(), LayoutError> {
    for binding in shader.bindings.iter() {
        let register_binding = binding.register_binding();
        let gap = |element: u32| LayoutError::RegisterGap {
            name: binding.name.clone(),
            binding: register_binding,
            element,
            stage,
        };
        let start = binding.register as u64;
        match binding.count {
            DescriptorCount::Unbounded => {
                // an unbounded shader array needs an unbounded table behind it
                let (_, param) =
                    find_parameter(parameters, stage, binding.range_type, binding.space, start)
                        .ok_or_else(|| gap(0))?;
                let end = param.registers().end;
                if end <= ShaderRegister::MAX as u64 {
                    return Err(gap((end - start) as u32));
                }
            }
            DescriptorCount::Bounded(count) => {
                let mut element = 0u64;
                while element < count as u64 {
                    let register = start + element;
                    let (_, param) = find_parameter(
                        parameters,
                        stage,
                        binding.range_type,
                        binding.space,
                        register,
                    )
                    .ok_or_else(|| gap(element as u32))?;
                    element = param.registers().end - start;
                }
            }
        }
    }
    Ok(())
}

/// An ordered, still mutable list of root parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RootBindingLayout {
    label: String,
    parameters: Vec<RootParameter>,
}

impl RootBindingLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: &str) -> Self {
        Self {
            label: label.to_string(),
            parameters: Vec::new(),
        }
    }

    /// Appends a parameter and returns the root slot it occupies.
    pub fn add_parameter(&mut self, parameter: RootParameter) -> RootIndex {
        self.parameters.push(parameter);
        (self.parameters.len() - 1) as RootIndex
    }

    /// Appends an inline constant buffer view visible to every stage.
    pub fn inline_cbv(mut self, space: RegisterSpace, register: ShaderRegister) -> Self {
        self.add_parameter(RootParameter::Inline(InlineDescriptor {
            visibility: ShaderStages::ALL,
            range_type: DescriptorRangeType::Cbv,
            space,
            register,
        }));
        self
    }

    /// Appends a single-range descriptor table visible to every stage.
    ///
    /// A `count` of [`rmt::UNBOUNDED_DESCRIPTOR_COUNT`] extends the range to
    /// the end of the heap.
    pub fn table(
        mut self,
        range_type: DescriptorRangeType,
        space: RegisterSpace,
        base_register: ShaderRegister,
        count: u32,
        table_offset: DescriptorIndex,
    ) -> Self {
        self.add_parameter(RootParameter::Table(TableRange {
            visibility: ShaderStages::ALL,
            range_type,
            space,
            base_register,
            count: DescriptorCount::from_raw(count),
            table_offset,
        }));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    pub fn dword_cost(&self) -> u32 {
        self.parameters.iter().map(RootParameter::dword_cost).sum()
    }

    pub fn validate(&self, limits: &Limits) -> Result<(), LayoutError> {
        let cost = self.dword_cost();
        if cost > limits.max_root_signature_dwords {
            return Err(LayoutError::TooManyParameters {
                cost,
                limit: limits.max_root_signature_dwords,
            });
        }

        let capacity = limits.cbv_srv_uav_heap_capacity;
        for (index, param) in self.parameters.iter().enumerate() {
            let index = index as RootIndex;
            if let RootParameter::Table(ref table) = *param {
                match table.count {
                    DescriptorCount::Bounded(0) => return Err(LayoutError::ZeroCount { index }),
                    DescriptorCount::Bounded(count) => {
                        if table.base_register as u64 + count as u64 > ShaderRegister::MAX as u64 + 1
                        {
                            return Err(LayoutError::RegisterOverflow { index });
                        }
                        let end = table.table_offset as u64 + count as u64;
                        if end > capacity as u64 {
                            log::error!(
                                "Root parameter {} spans descriptors {}..{} of a {}-slot heap",
                                index,
                                table.table_offset,
                                end,
                                capacity
                            );
                            return Err(LayoutError::CapacityExceeded {
                                index,
                                end,
                                capacity,
                            });
                        }
                    }
                    DescriptorCount::Unbounded => {
                        if table.table_offset >= capacity {
                            return Err(LayoutError::CapacityExceeded {
                                index,
                                end: table.table_offset as u64 + 1,
                                capacity,
                            });
                        }
                    }
                }
            }
        }

        for (index, param) in self.parameters.iter().enumerate() {
            let registers = param.registers();
            for (other, prior) in self.parameters[..index].iter().enumerate() {
                let prior_registers = prior.registers();
                if param.aliases(prior)
                    && registers.start < prior_registers.end
                    && prior_registers.start < registers.end
                {
                    return Err(LayoutError::OverlappingRange {
                        index: index as RootIndex,
                        other: other as RootIndex,
                        range_type: param.range_type(),
                        space: param.space(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn validate_coverage(
        &self,
        stage: ShaderStages,
        shader: &ShaderInterface,
    ) -> Result<(), LayoutError> {
        check_coverage(&self.parameters, stage, shader)
    }

    /// Validate and produce an immutable root signature.
    pub fn freeze(self, limits: &Limits) -> Result<RootSignature, LayoutError> {
        self.validate(limits)?;
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let signature = RootSignature {
            id: RootSignatureId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            label: self.label,
            parameters: self.parameters.into_boxed_slice(),
            heap_capacity: limits.cbv_srv_uav_heap_capacity,
        };
        log::debug!(
            "Froze root signature {:?} '{}' with {} parameters",
            signature.id,
            signature.label,
            signature.parameters.len()
        );
        Ok(signature)
    }
}

/// Identity of a frozen root signature.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RootSignatureId(u64);

/// A validated root binding layout.
#[derive(Debug)]
pub struct RootSignature {
    id: RootSignatureId,
    label: String,
    parameters: Box<[RootParameter]>,
    heap_capacity: DescriptorIndex,
}

impl RootSignature {
    pub fn id(&self) -> RootSignatureId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    pub fn parameter(&self, index: RootIndex) -> Option<&RootParameter> {
        self.parameters.get(index as usize)
    }

    /// Capacity of the heap the signature was validated against.
    pub fn heap_capacity(&self) -> DescriptorIndex {
        self.heap_capacity
    }

    pub fn find_parameter(
        &self,
        stage: ShaderStages,
        range_type: DescriptorRangeType,
        space: RegisterSpace,
        register: u64,
    ) -> Option<(RootIndex, &RootParameter)> {
        find_parameter(&self.parameters, stage, range_type, space, register)
    }

    pub fn validate_coverage(
        &self,
        stage: ShaderStages,
        shader: &ShaderInterface,
    ) -> Result<(), LayoutError> {
        check_coverage(&self.parameters, stage, shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderInterface;
    use rmt::{
        DescriptorRangeType::{Cbv, Srv},
        UNBOUNDED_DESCRIPTOR_COUNT,
    };

    fn limits(capacity: u32) -> Limits {
        Limits::with_heap_capacity(capacity)
    }

    #[test]
    fn overlapping_srv_tables() {
        let layout = RootBindingLayout::new()
            .table(Srv, 0, 0, 4, 0)
            .table(Srv, 0, 2, 4, 10);
        assert_eq!(
            layout.validate(&limits(64)),
            Err(LayoutError::OverlappingRange {
                index: 1,
                other: 0,
                range_type: Srv,
                space: 0,
            })
        );
    }

    #[test]
    fn other_space_or_type_does_not_overlap() {
        let layout = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Srv, 0, 0, 4, 0)
            .table(Srv, 1, 0, 4, 4)
            .table(Cbv, 0, 0, 3, 8);
        assert_eq!(layout.validate(&limits(64)), Ok(()));
    }

    #[test]
    fn inline_takes_part_in_overlap() {
        let layout = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Cbv, 0, 0, 12, 0);
        assert!(matches!(
            layout.validate(&limits(64)),
            Err(LayoutError::OverlappingRange { index: 1, other: 0, .. })
        ));
    }

    #[test]
    fn unbounded_overlaps_everything_above() {
        let below = RootBindingLayout::new()
            .table(Srv, 0, 0, 2, 0)
            .table(Srv, 0, 2, UNBOUNDED_DESCRIPTOR_COUNT, 10);
        assert_eq!(below.validate(&limits(64)), Ok(()));

        let above = RootBindingLayout::new()
            .table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 0)
            .table(Srv, 0, 1000, 1, 10);
        assert!(matches!(
            above.validate(&limits(64)),
            Err(LayoutError::OverlappingRange { .. })
        ));
    }

    #[test]
    fn visibility_separates_ranges() {
        let mut layout = RootBindingLayout::new();
        for visibility in [ShaderStages::VERTEX, ShaderStages::PIXEL] {
            layout.add_parameter(RootParameter::Table(TableRange {
                visibility,
                range_type: Srv,
                space: 0,
                base_register: 0,
                count: DescriptorCount::Bounded(1),
                table_offset: 0,
            }));
        }
        assert_eq!(layout.validate(&limits(8)), Ok(()));
    }

    #[test]
    fn table_capacity() {
        let fits = RootBindingLayout::new().table(Cbv, 0, 4, 12, 0);
        assert_eq!(fits.validate(&limits(12)), Ok(()));

        let spills = RootBindingLayout::new().table(Cbv, 0, 4, 12, 1);
        assert_eq!(
            spills.validate(&limits(12)),
            Err(LayoutError::CapacityExceeded {
                index: 0,
                end: 13,
                capacity: 12,
            })
        );

        let unbounded = RootBindingLayout::new().table(Srv, 0, 0, u32::MAX, 12);
        assert!(matches!(
            unbounded.validate(&limits(12)),
            Err(LayoutError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn zero_count_and_overflow() {
        let zero = RootBindingLayout::new().table(Srv, 0, 0, 0, 0);
        assert_eq!(
            zero.validate(&limits(8)),
            Err(LayoutError::ZeroCount { index: 0 })
        );
        let overflow = RootBindingLayout::new().table(Srv, 0, u32::MAX, 2, 0);
        assert_eq!(
            overflow.validate(&limits(8)),
            Err(LayoutError::RegisterOverflow { index: 0 })
        );
    }

    #[test]
    fn root_signature_budget() {
        let mut layout = RootBindingLayout::new();
        for register in 0..33 {
            layout = layout.inline_cbv(0, register);
        }
        assert_eq!(
            layout.validate(&Limits::default()),
            Err(LayoutError::TooManyParameters { cost: 66, limit: 64 })
        );
    }

    #[test]
    fn coverage_reports_first_gap() {
        let layout = RootBindingLayout::new()
            .inline_cbv(0, 3)
            .table(Cbv, 0, 4, 6, 0)
            .table(Cbv, 0, 10, 4, 6);
        let shader = ShaderInterface::new()
            .binding("test", Cbv, 0, 3, 1)
            .binding("bar", Cbv, 0, 4, 12);
        assert_eq!(
            layout.validate_coverage(ShaderStages::PIXEL, &shader),
            Err(LayoutError::RegisterGap {
                name: "bar".to_string(),
                binding: RegisterBinding {
                    range_type: Cbv,
                    space: 0,
                    register: 4,
                },
                element: 10,
                stage: ShaderStages::PIXEL,
            })
        );
    }

    #[test]
    fn unbounded_shader_array_needs_unbounded_table() {
        let shader = ShaderInterface::new().binding("resArray", Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT);
        let bounded = RootBindingLayout::new().table(Srv, 0, 0, 8, 30);
        assert!(matches!(
            bounded.validate_coverage(ShaderStages::PIXEL, &shader),
            Err(LayoutError::RegisterGap { element: 8, .. })
        ));
        let unbounded = RootBindingLayout::new().table(Srv, 0, 0, UNBOUNDED_DESCRIPTOR_COUNT, 30);
        assert_eq!(unbounded.validate_coverage(ShaderStages::PIXEL, &shader), Ok(()));
    }

    #[test]
    fn frozen_signatures_are_distinct() {
        let a = RootBindingLayout::new().inline_cbv(0, 3).freeze(&limits(8)).unwrap();
        let b = RootBindingLayout::new().inline_cbv(0, 3).freeze(&limits(8)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.parameters(), b.parameters());
        assert_eq!(
            a.find_parameter(ShaderStages::PIXEL, Cbv, 0, 3).map(|(index, _)| index),
            Some(0)
        );
    }
}
